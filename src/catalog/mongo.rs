//! MongoDB product collection read through the synchronous driver.

use anyhow::{anyhow, Context, Result};
use mongodb::bson::{doc, Bson, Document};
use mongodb::sync::{Client, Collection};

use super::{ProductRecord, ProductSource, RecordError, RecordResult};

/// Default database name when none is configured.
pub const DEFAULT_DATABASE: &str = "test";
/// Default collection name when none is configured.
pub const DEFAULT_COLLECTION: &str = "products";

/// Full scan over a MongoDB products collection.
pub struct MongoCatalog {
    collection: Collection<Document>,
}

impl MongoCatalog {
    /// Connects to `uri` and selects `database.collection`.
    pub fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        anyhow::ensure!(!uri.trim().is_empty(), "MongoDB connection URI is required");
        let client = Client::with_uri_str(uri).context("failed to connect to MongoDB")?;
        let collection = client.database(database).collection::<Document>(collection);
        tracing::info!(
            database,
            collection = collection.name(),
            "connected to product catalog"
        );
        Ok(Self { collection })
    }
}

impl ProductSource for MongoCatalog {
    fn products(&mut self) -> Result<Box<dyn Iterator<Item = RecordResult> + '_>> {
        let cursor = self
            .collection
            .find(doc! {})
            .projection(doc! { "_id": 1, "images": 1 })
            .run()
            .context("failed to query product collection")?;
        Ok(Box::new(cursor.map(|item| match item {
            Ok(document) => record_from_document(&document),
            Err(err) => Err(RecordError::new(
                None,
                anyhow!(err).context("failed to read product document"),
            )),
        })))
    }
}

/// Extracts the id and image list from a product document.
///
/// A missing `_id` is an error. A missing or null `images` field yields an
/// empty list so the vectorizer reports the product as having no image; any
/// other shape, including a non-string entry, fails the record.
pub fn record_from_document(document: &Document) -> RecordResult {
    let id = match document.get("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(text)) => text.clone(),
        Some(Bson::Int32(n)) => n.to_string(),
        Some(Bson::Int64(n)) => n.to_string(),
        Some(other) => other.to_string(),
        None => {
            return Err(RecordError::new(
                None,
                anyhow!("product document has no _id"),
            ))
        }
    };
    let images = match document.get("images") {
        None | Some(Bson::Null) => Vec::new(),
        Some(Bson::Array(values)) => values
            .iter()
            .enumerate()
            .map(|(pos, value)| match value {
                Bson::String(url) => Ok(url.clone()),
                other => Err(anyhow!(
                    "images[{pos}] is {:?}, not a URL string",
                    other.element_type()
                )),
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|err| RecordError::new(Some(id.clone()), err))?,
        Some(other) => {
            return Err(RecordError::new(
                Some(id),
                anyhow!("images is {:?}, not an array", other.element_type()),
            ))
        }
    };
    Ok(ProductRecord { id, images })
}
