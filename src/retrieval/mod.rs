//! Query-time retrieval: ranking, snippets and the search response contract


use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MAX_TOP_K;
use crate::index::VectorIndex;
use crate::kb::mirror::PostMirror;
use crate::kb::post::Post;
use crate::{KbError, Result};

/// Marker appended to truncated snippets
pub const ELLIPSIS: &str = "...";

pub const DEFAULT_TOP_K: usize = 3;

pub const NOT_FOUND_MESSAGE: &str = "No relevant posts found for your query.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub post_id: String,
    pub title: String,
    pub relevance_score: f32,
    pub matched_content: String,
    pub reason: String,
}

/// Public search request, as accepted by the CLI and the tool surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl SearchRequest {
    #[inline]
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
        }
    }

    /// Enforce a non-blank query and `top_k` within `[1, MAX_TOP_K]`
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(KbError::InvalidInput("query must not be empty".to_string()));
        }

        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(KbError::InvalidInput(format!(
                "top_k must be between 1 and {MAX_TOP_K}, got {}",
                self.top_k
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Found,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: SearchStatus,
    pub query: String,
    pub results_count: usize,
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SearchResponse {
    /// Wrap search results; "found" vs "not_found" is decided purely by emptiness
    #[inline]
    pub fn from_results(query: impl Into<String>, results: Vec<SearchResult>) -> Self {
        let query = query.into();
        if results.is_empty() {
            return Self {
                status: SearchStatus::NotFound,
                query,
                results_count: 0,
                results,
                message: Some(NOT_FOUND_MESSAGE.to_string()),
            };
        }

        Self {
            status: SearchStatus::Found,
            query,
            results_count: results.len(),
            results,
            message: None,
        }
    }

    #[inline]
    pub fn is_found(&self) -> bool {
        self.status == SearchStatus::Found
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPostResponse {
    pub status: String,
    pub message: String,
    pub post_id: String,
    pub title: String,
}

impl AddPostResponse {
    #[inline]
    pub fn success(post: &Post) -> Self {
        Self {
            status: "success".to_string(),
            message: "Post added successfully".to_string(),
            post_id: post.id.clone(),
            title: post.title.clone(),
        }
    }
}

/// First `max_length` characters of `content`, with an ellipsis when cut
#[inline]
pub fn extract_snippet(content: &str, max_length: usize) -> String {
    let mut chars = content.chars();
    let mut snippet: String = chars.by_ref().take(max_length).collect();
    if chars.next().is_some() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// Human-readable justification for a hit
#[inline]
pub fn build_reason(score: f32, tags: &[String]) -> String {
    if tags.is_empty() {
        format!("Semantic similarity: {score:.3}")
    } else {
        format!(
            "Semantic similarity: {score:.3}; Tags: {}",
            tags.iter().join(", ")
        )
    }
}

/// Rank the index against `query_vector` and resolve hits through the mirror
///
/// Records whose post is missing from the mirror, or inactive, are skipped and
/// do not count toward `top_k`.
#[inline]
pub fn collect_results(
    index: &VectorIndex,
    mirror: &PostMirror,
    query_vector: &[f32],
    top_k: usize,
    snippet_length: usize,
) -> Result<Vec<SearchResult>> {
    if top_k == 0 || index.is_empty() {
        return Ok(Vec::new());
    }

    let mut results = Vec::with_capacity(top_k.min(index.len()));
    let mut skipped = 0_usize;

    for neighbor in index.ranked(query_vector)? {
        if results.len() == top_k {
            break;
        }

        let Some(post) = mirror.resolve_active(&neighbor.post_id) else {
            warn!(
                "Skipping orphaned index record for post {}",
                neighbor.post_id
            );
            skipped += 1;
            continue;
        };

        let score = neighbor.similarity();
        results.push(SearchResult {
            post_id: post.id.clone(),
            title: post.title.clone(),
            relevance_score: score,
            matched_content: extract_snippet(&post.content, snippet_length),
            reason: build_reason(score, &post.tags),
        });
    }

    debug!(
        "Collected {} results ({} orphaned records skipped)",
        results.len(),
        skipped
    );

    Ok(results)
}
