//! Exact (brute-force) nearest-neighbour index over unit-norm embeddings.

use std::cmp::Ordering;

use thiserror::Error;

use crate::embeddings::squared_l2;
use crate::vector_table::VectorTable;

/// Errors returned by [`FlatIndex::search`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The query width differs from the indexed vectors.
    #[error("query has {actual} components, index expects {expected}")]
    Dimension {
        /// Indexed vector width.
        expected: usize,
        /// Query width.
        actual: usize,
    },
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Product id of the stored row.
    pub id: String,
    /// Squared Euclidean distance from the query.
    pub distance: f32,
}

/// Immutable flat index, vectors stored contiguously in row-major order.
///
/// Search scans every row with squared L2 distance. Rows are unit-norm, so
/// this ranks identically to cosine similarity.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    ids: Vec<String>,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Builds the index from a validated table.
    pub fn from_table(table: VectorTable) -> Self {
        let dimension = table.dimension();
        let (ids, vectors) = table.into_parts();
        let mut data = Vec::with_capacity(ids.len() * dimension);
        for vector in vectors {
            data.extend_from_slice(vector.as_slice());
        }
        Self {
            dimension,
            ids,
            data,
        }
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the `k` nearest rows ordered by ascending distance.
    ///
    /// Equal distances are ordered by id, so the result does not depend on the
    /// order rows were stored in.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Match>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(self.dimension)
            .map(|row| squared_l2(row, query))
            .enumerate()
            .map(|(row, distance)| (distance, row))
            .collect();

        let by_distance = |a: &(f32, usize), b: &(f32, usize)| -> Ordering {
            a.0.total_cmp(&b.0)
                .then_with(|| self.ids[a.1].cmp(&self.ids[b.1]))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        Ok(scored
            .into_iter()
            .map(|(distance, row)| Match {
                id: self.ids[row].clone(),
                distance,
            })
            .collect())
    }
}
