//! In-memory vector index over post embeddings
//!
//! Exact nearest-neighbour search under squared Euclidean distance. The index
//! holds at most one record per post and keeps records in insertion order so
//! equal distances always rank the same way.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use crate::{KbError, Result};

/// One embedded post
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub post_id: String,
    pub vector: Vec<f32>,
    /// The exact text the vector was derived from (`title + ". " + content`)
    pub source_text: String,
}

/// A ranked hit returned by [`VectorIndex::nearest`]
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub post_id: String,
    pub distance: f32,
}

impl Neighbor {
    #[inline]
    pub fn similarity(&self) -> f32 {
        similarity_from_distance(self.distance)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    records: Vec<EmbeddingRecord>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
}

/// Squared Euclidean distance between two equally sized vectors
#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Convert a distance into a relevance score in (0, 1]
///
/// `1 / (1 + d)` for positive distances, `1.0` otherwise.
#[inline]
pub fn similarity_from_distance(distance: f32) -> f32 {
    if distance > 0.0 {
        1.0 / (1.0 + distance)
    } else {
        1.0
    }
}

/// Reject vectors that would poison every later comparison
#[inline]
pub fn validate_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(KbError::Embedding("embedding vector is empty".to_string()));
    }

    if vector.iter().any(|v| !v.is_finite()) {
        return Err(KbError::Embedding(
            "embedding vector contains non-finite values".to_string(),
        ));
    }

    if vector.iter().all(|v| *v == 0.0) {
        return Err(KbError::Embedding(
            "embedding vector is all zeros".to_string(),
        ));
    }

    Ok(())
}

impl VectorIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Dimension shared by every stored vector, fixed by the first insert
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[inline]
    pub fn contains(&self, post_id: &str) -> bool {
        self.positions.contains_key(post_id)
    }

    #[inline]
    pub fn get(&self, post_id: &str) -> Option<&EmbeddingRecord> {
        self.positions.get(post_id).map(|&pos| &self.records[pos])
    }

    /// Post ids in insertion order
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.post_id.as_str())
    }

    #[inline]
    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    /// Insert a record, replacing any existing record for the same post in place
    ///
    /// Returns `true` when an existing record was replaced.
    #[inline]
    pub fn insert(&mut self, record: EmbeddingRecord) -> Result<bool> {
        validate_vector(&record.vector)?;
        self.check_dimension(record.vector.len())?;

        if self.dimension.is_none() {
            self.dimension = Some(record.vector.len());
        }

        if let Some(&pos) = self.positions.get(&record.post_id) {
            self.records[pos] = record;
            return Ok(true);
        }

        self.positions
            .insert(record.post_id.clone(), self.records.len());
        self.records.push(record);
        Ok(false)
    }

    /// Remove the record for `post_id`, returning whether one existed
    #[inline]
    pub fn remove(&mut self, post_id: &str) -> bool {
        let Some(pos) = self.positions.remove(post_id) else {
            return false;
        };

        // `Vec::remove` keeps the relative order of the survivors
        self.records.remove(pos);
        for (offset, record) in self.records[pos..].iter().enumerate() {
            if let Some(slot) = self.positions.get_mut(&record.post_id) {
                *slot = pos + offset;
            }
        }

        if self.records.is_empty() {
            self.dimension = None;
        }

        true
    }

    /// Every record ordered by ascending distance to `query`
    ///
    /// Ties keep insertion order. An empty index yields an empty list.
    #[inline]
    pub fn ranked(&self, query: &[f32]) -> Result<Vec<Neighbor>> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }

        self.check_dimension(query.len())?;

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, record)| (pos, squared_euclidean(query, &record.vector)))
            .collect();

        // Stable sort, so equal distances stay in insertion order
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(scored
            .into_iter()
            .map(|(pos, distance)| Neighbor {
                post_id: self.records[pos].post_id.clone(),
                distance,
            })
            .collect())
    }

    /// The `k` records closest to `query`, nearest first
    #[inline]
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut ranked = self.ranked(query)?;
        ranked.truncate(k);
        Ok(ranked)
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        match self.dimension {
            Some(dimension) if dimension != len => Err(KbError::InvalidInput(format!(
                "vector dimension mismatch: index holds {dimension}-dimensional vectors, got {len}"
            ))),
            _ => Ok(()),
        }
    }
}
