//! Product catalog access for the vectorizer.

pub mod jsonl;
pub mod mongo;

use anyhow::Result;

pub use jsonl::JsonlCatalog;
pub use mongo::MongoCatalog;

/// A product as far as visual search is concerned: an id and its image URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    /// Catalog identifier (ObjectIds rendered as hex).
    pub id: String,
    /// Image URLs in catalog order.
    pub images: Vec<String>,
}

impl ProductRecord {
    /// The image used for embedding: the first listed URL.
    pub fn primary_image(&self) -> Option<&str> {
        self.images
            .first()
            .map(String::as_str)
            .filter(|url| !url.trim().is_empty())
    }
}

/// A failure tied to one catalog entry; the run continues past it.
#[derive(Debug)]
pub struct RecordError {
    /// Identifier of the entry, when one could be read.
    pub id: Option<String>,
    /// What went wrong.
    pub error: anyhow::Error,
}

impl RecordError {
    pub(crate) fn new(id: Option<String>, error: anyhow::Error) -> Self {
        Self { id, error }
    }
}

/// One item yielded by a [`ProductSource`].
pub type RecordResult = std::result::Result<ProductRecord, RecordError>;

/// Something that can enumerate the product catalog.
///
/// Opening the source may fail as a whole; individual entries fail on their own.
pub trait ProductSource {
    /// Iterates every product in the catalog.
    fn products(&mut self) -> Result<Box<dyn Iterator<Item = RecordResult> + '_>>;
}

impl ProductSource for Vec<ProductRecord> {
    fn products(&mut self) -> Result<Box<dyn Iterator<Item = RecordResult> + '_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}
