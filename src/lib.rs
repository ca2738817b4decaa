#![warn(missing_docs)]
//! Image-similarity search for product catalogs.
//!
//! The `vectorizer` binary embeds each product's primary image with CLIP and
//! writes a vector table; the `search-api` binary loads that table into an
//! exact in-memory index and answers image queries over HTTP.

pub mod catalog;
pub mod config;
pub mod embeddings;
pub mod encoder;
pub mod fetch;
pub mod index;
pub mod service;
pub mod vector_table;
pub mod vectorizer;

pub use catalog::{JsonlCatalog, MongoCatalog, ProductRecord, ProductSource};
pub use embeddings::{Embedding, EmbeddingError, EMBEDDING_DIM};
pub use encoder::clip::ClipEncoder;
pub use encoder::{embed_image_bytes, ImageEncoder};
pub use fetch::{HttpImageFetcher, ImageFetcher};
pub use index::{FlatIndex, Match};
pub use service::{router, SearchContext, SearchLimits};
pub use vector_table::{VectorTable, VectorTableError};
pub use vectorizer::{VectorizeReport, Vectorizer};
