//! Offline pipeline: catalog → primary image → embedding → vector table.

use anyhow::{anyhow, Context, Result};

use crate::catalog::{ProductRecord, ProductSource, RecordError};
use crate::embeddings::Embedding;
use crate::encoder::{embed_image_bytes, ImageEncoder};
use crate::fetch::ImageFetcher;
use crate::vector_table::VectorTable;

/// Counters describing one vectorizer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorizeReport {
    /// Catalog entries seen, including ones that failed.
    pub seen: usize,
    /// Entries that made it into the table.
    pub embedded: usize,
    /// Entries skipped because of an error.
    pub failed: usize,
    /// Ids of skipped entries, when known.
    pub failed_ids: Vec<String>,
}

/// Sequential embedding job over a product catalog.
///
/// Every failure (unreadable record, missing image, fetch, decode or model
/// error) is logged and the product skipped. Nothing is retried.
pub struct Vectorizer<'a> {
    encoder: &'a dyn ImageEncoder,
    fetcher: &'a dyn ImageFetcher,
}

impl<'a> Vectorizer<'a> {
    /// Pipeline over the given encoder and fetcher.
    pub fn new(encoder: &'a dyn ImageEncoder, fetcher: &'a dyn ImageFetcher) -> Self {
        Self { encoder, fetcher }
    }

    /// Embeds one product's primary image.
    pub fn embed_product(&self, product: &ProductRecord) -> Result<Embedding> {
        let url = product
            .primary_image()
            .ok_or_else(|| anyhow!("product has no image"))?;
        let bytes = self.fetcher.fetch(url)?;
        embed_image_bytes(self.encoder, &bytes).with_context(|| format!("image {url}"))
    }

    /// Runs the whole catalog and returns the table plus run counters.
    pub fn run(&self, source: &mut dyn ProductSource) -> Result<(VectorTable, VectorizeReport)> {
        let mut table = VectorTable::new(self.encoder.dimension());
        let mut report = VectorizeReport::default();

        for item in source.products()? {
            report.seen += 1;
            let product = match item {
                Ok(product) => product,
                Err(RecordError { id, error }) => {
                    tracing::warn!(
                        id = id.as_deref().unwrap_or("<unknown>"),
                        "skipping unreadable product: {error:#}"
                    );
                    report.failed += 1;
                    report.failed_ids.extend(id);
                    continue;
                }
            };

            let outcome = self.embed_product(&product).and_then(|embedding| {
                table
                    .push(product.id.clone(), embedding)
                    .map_err(Into::into)
            });
            match outcome {
                Ok(()) => {
                    report.embedded += 1;
                    tracing::info!(id = %product.id, "processed product");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(id = %product.id, "failed to process product: {err:#}");
                    report.failed_ids.push(product.id);
                }
            }
        }

        tracing::info!(
            seen = report.seen,
            embedded = report.embedded,
            failed = report.failed,
            "vectorization finished"
        );
        Ok((table, report))
    }
}
