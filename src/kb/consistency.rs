//! Consistency checks between the post mirror (or the store) and the index

use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use super::post::Post;
use crate::index::VectorIndex;

/// Result of comparing a set of active posts against the vector index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Number of active posts compared
    pub posts: usize,
    /// Number of records in the index
    pub records: usize,
    /// Active posts with no index record
    pub missing_in_index: Vec<String>,
    /// Index records with no active post
    pub orphaned_in_index: Vec<String>,
    /// Records embedded from text that no longer matches the post
    pub stale_records: Vec<String>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    /// Compare `posts` with `index`; inactive posts count as absent
    #[inline]
    pub fn compare<'a>(posts: impl IntoIterator<Item = &'a Post>, index: &VectorIndex) -> Self {
        let active: Vec<&Post> = posts.into_iter().filter(|p| p.active).collect();
        let post_ids: HashSet<&str> = active.iter().map(|p| p.id.as_str()).collect();

        let mut missing_in_index: Vec<String> = active
            .iter()
            .filter(|p| !index.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();
        missing_in_index.sort();

        let mut orphaned_in_index: Vec<String> = index
            .ids()
            .filter(|id| !post_ids.contains(id))
            .map(str::to_string)
            .collect();
        orphaned_in_index.sort();

        let mut stale_records: Vec<String> = active
            .iter()
            .filter(|p| {
                index
                    .get(&p.id)
                    .is_some_and(|record| record.source_text != p.embedding_text())
            })
            .map(|p| p.id.clone())
            .collect();
        stale_records.sort();

        let is_consistent = missing_in_index.is_empty()
            && orphaned_in_index.is_empty()
            && stale_records.is_empty();

        let report = Self {
            posts: active.len(),
            records: index.len(),
            missing_in_index,
            orphaned_in_index,
            stale_records,
            is_consistent,
        };

        if report.is_consistent {
            info!("Knowledge base consistency validation passed");
        } else {
            report.log_issues();
        }

        report
    }

    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Knowledge base is consistent: {} active posts, {} index records",
                self.posts, self.records
            )
        } else {
            format!(
                "Knowledge base inconsistencies found: {} missing in index, {} orphaned in index, {} stale records",
                self.missing_in_index.len(),
                self.orphaned_in_index.len(),
                self.stale_records.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_in_index.len() + self.orphaned_in_index.len() + self.stale_records.len()
    }

    fn log_issues(&self) {
        if !self.missing_in_index.is_empty() {
            warn!(
                "Found {} active posts missing from the index",
                self.missing_in_index.len()
            );
        }

        if !self.orphaned_in_index.is_empty() {
            warn!(
                "Found {} orphaned index records: {:?}",
                self.orphaned_in_index.len(),
                self.orphaned_in_index
            );
        }

        if !self.stale_records.is_empty() {
            warn!(
                "Found {} stale index records: {:?}",
                self.stale_records.len(),
                self.stale_records
            );
        }
    }
}
