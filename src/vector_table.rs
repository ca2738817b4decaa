//! Persisted `(id, vector)` table written by the vectorizer and loaded by the search API.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embeddings::{Embedding, EmbeddingError, UNIT_NORM_TOLERANCE};

/// Failures raised while reading, validating or writing a vector table.
#[derive(Debug, Error)]
pub enum VectorTableError {
    /// No table exists at the path.
    #[error("vector table {0} does not exist")]
    Missing(PathBuf),
    /// Underlying filesystem failure.
    #[error("vector table I/O error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Source error.
        #[source]
        source: io::Error,
    },
    /// The file is not valid table JSON.
    #[error("vector table is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// `ids` and `vectors` differ in length.
    #[error("vector table has {ids} ids but {vectors} vectors")]
    LengthMismatch {
        /// Number of ids.
        ids: usize,
        /// Number of vectors.
        vectors: usize,
    },
    /// A row failed embedding validation.
    #[error("vector for id {id:?} (row {row}) is invalid: {source}")]
    InvalidVector {
        /// Row position.
        row: usize,
        /// Product id at that row.
        id: String,
        /// Validation failure.
        #[source]
        source: EmbeddingError,
    },
}

/// On-disk JSON shape: `{"ids": [...], "vectors": [[...], ...]}`.
#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

/// Validated parallel arrays of product ids and unit-norm embeddings.
///
/// Row `i` of `ids` belongs to row `i` of `vectors`; both always have the same
/// length and every vector has exactly `dimension` components.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorTable {
    dimension: usize,
    ids: Vec<String>,
    vectors: Vec<Embedding>,
}

impl VectorTable {
    /// Empty table for vectors of the given width.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Appends a row after checking the embedding width.
    pub fn push(
        &mut self,
        id: impl Into<String>,
        embedding: Embedding,
    ) -> Result<(), VectorTableError> {
        let id = id.into();
        if let Err(source) = embedding.ensure_dimension(self.dimension) {
            return Err(VectorTableError::InvalidVector {
                row: self.ids.len(),
                id,
                source,
            });
        }
        self.ids.push(id);
        self.vectors.push(embedding);
        Ok(())
    }

    /// Vector width shared by every row.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Product ids in row order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Embeddings in row order.
    pub fn vectors(&self) -> &[Embedding] {
        &self.vectors
    }

    /// Splits the table into its id and vector columns.
    pub fn into_parts(self) -> (Vec<String>, Vec<Embedding>) {
        (self.ids, self.vectors)
    }

    /// Loads and validates a table file.
    ///
    /// An absent file is reported as [`VectorTableError::Missing`] so callers can
    /// treat it differently from a corrupt one.
    pub fn load(path: &Path, dimension: usize) -> Result<Self, VectorTableError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VectorTableError::Missing(path.to_path_buf()))
            }
            Err(source) => {
                return Err(VectorTableError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_reader(BufReader::new(file), dimension)
    }

    /// Parses and validates table JSON from any reader.
    pub fn from_reader<R: Read>(reader: R, dimension: usize) -> Result<Self, VectorTableError> {
        let raw: TableFile = serde_json::from_reader(reader)?;
        if raw.ids.len() != raw.vectors.len() {
            return Err(VectorTableError::LengthMismatch {
                ids: raw.ids.len(),
                vectors: raw.vectors.len(),
            });
        }
        let mut table = Self::new(dimension);
        for (row, (id, values)) in raw.ids.into_iter().zip(raw.vectors).enumerate() {
            let embedding = Embedding::from_unit(values, UNIT_NORM_TOLERANCE)
                .and_then(|e| e.ensure_dimension(dimension).map(|_| e));
            match embedding {
                Ok(embedding) => {
                    table.ids.push(id);
                    table.vectors.push(embedding);
                }
                Err(source) => return Err(VectorTableError::InvalidVector { row, id, source }),
            }
        }
        Ok(table)
    }

    /// Serializes the table as JSON into `writer`.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), VectorTableError> {
        let file = TableFile {
            ids: self.ids.clone(),
            vectors: self.vectors.iter().map(|e| e.as_slice().to_vec()).collect(),
        };
        serde_json::to_writer(writer, &file)?;
        Ok(())
    }

    /// Writes the table to `path`, replacing any previous table.
    ///
    /// Data goes to a sibling `.tmp` file first and is renamed into place, so
    /// readers never observe a half-written table.
    pub fn write(&self, path: &Path) -> Result<(), VectorTableError> {
        let io_err = |source: io::Error| VectorTableError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp_path = temp_path(path);
        let file = File::create(&tmp_path).map_err(|source| VectorTableError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer)?;
        writer.flush().map_err(io_err)?;
        writer
            .into_inner()
            .map_err(|err| io_err(err.into_error()))?
            .sync_all()
            .map_err(io_err)?;
        fs::rename(&tmp_path, path).map_err(io_err)?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
