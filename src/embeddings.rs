//! Unit-norm embedding vectors shared by the vectorizer, the table loader and the index.

use thiserror::Error;

/// Output width of the CLIP ViT-B/32 image projection.
pub const EMBEDDING_DIM: usize = 512;

/// Norm tolerance accepted when re-reading vectors that were normalized elsewhere.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Reasons a vector cannot become an [`Embedding`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    /// The vector had no components.
    #[error("embedding has no components")]
    Empty,
    /// A component was NaN or infinite.
    #[error("embedding component {index} is not finite")]
    NonFinite {
        /// Position of the offending component.
        index: usize,
    },
    /// The raw vector has zero length and cannot be normalized.
    #[error("embedding has zero norm")]
    ZeroNorm,
    /// A supposedly normalized vector is not unit length.
    #[error("embedding norm {norm} is not 1 (tolerance {tolerance})")]
    NotUnit {
        /// Observed Euclidean norm.
        norm: f32,
        /// Allowed deviation from 1.
        tolerance: f32,
    },
    /// The vector width differs from the expected dimension.
    #[error("embedding has {actual} components, expected {expected}")]
    Dimension {
        /// Expected component count.
        expected: usize,
        /// Observed component count.
        actual: usize,
    },
}

/// A fixed-length vector with Euclidean norm 1.
///
/// Every vector stored in the index and every query goes through this type,
/// which keeps squared L2 distance a monotonic function of cosine similarity
/// (`|a - b|^2 = 2 - 2 cos(a, b)` for unit vectors).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// L2-normalizes raw model features.
    pub fn from_raw(mut raw: Vec<f32>) -> Result<Self, EmbeddingError> {
        check_finite(&raw)?;
        let norm = l2_norm(&raw);
        if norm == 0.0 {
            return Err(EmbeddingError::ZeroNorm);
        }
        for value in raw.iter_mut() {
            *value /= norm;
        }
        Ok(Self(raw))
    }

    /// Accepts a vector that is expected to already be unit length.
    pub fn from_unit(values: Vec<f32>, tolerance: f32) -> Result<Self, EmbeddingError> {
        check_finite(&values)?;
        let norm = l2_norm(&values);
        if (norm - 1.0).abs() > tolerance {
            return Err(EmbeddingError::NotUnit { norm, tolerance });
        }
        Ok(Self(values))
    }

    /// Fails unless the embedding has exactly `expected` components.
    pub fn ensure_dimension(&self, expected: usize) -> Result<(), EmbeddingError> {
        if self.0.len() != expected {
            return Err(EmbeddingError::Dimension {
                expected,
                actual: self.0.len(),
            });
        }
        Ok(())
    }

    /// Number of components.
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Borrowed view of the components.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Consumes the embedding, returning its components.
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Euclidean length of `values`, accumulated in `f64`.
pub fn l2_norm(values: &[f32]) -> f32 {
    values
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt() as f32
}

/// Squared Euclidean distance between two equally sized vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn check_finite(values: &[f32]) -> Result<(), EmbeddingError> {
    if values.is_empty() {
        return Err(EmbeddingError::Empty);
    }
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(EmbeddingError::NonFinite { index }),
        None => Ok(()),
    }
}
