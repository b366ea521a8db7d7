//! Knowledge base coordinator
//!
//! Owns the post mirror and the vector index, keeps them in step with the
//! persistent store and answers semantic queries. Every mutation goes through
//! one sync guard; readers only ever see a fully built state.

pub mod consistency;
pub mod mirror;
pub mod post;
pub mod sync;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SyncPolicy};
use crate::embeddings::EmbeddingProvider;
use crate::index::{EmbeddingRecord, VectorIndex, validate_vector};
use crate::retrieval::{SearchRequest, SearchResponse, SearchResult, collect_results};
use crate::{KbError, Result};

pub use consistency::ConsistencyReport;
pub use mirror::PostMirror;
pub use post::{Post, sample_posts};

/// Where the knowledge base loads its posts from
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Every active post, in a stable order
    async fn list_active_posts(&self) -> anyhow::Result<Vec<Post>>;

    /// The stored post with this id, active or not
    async fn get_post(&self, id: &str) -> anyhow::Result<Option<Post>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbSettings {
    pub sync_policy: SyncPolicy,
    pub snippet_length: usize,
    pub embedding_timeout: Duration,
    pub batch_size: usize,
}

impl Default for KbSettings {
    #[inline]
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl KbSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            sync_policy: config.knowledge_base.sync_policy,
            snippet_length: config.knowledge_base.snippet_length,
            embedding_timeout: config.embedding_timeout(),
            batch_size: config.embedding.batch_size.max(1) as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// A rebuild that started after this request arrived already completed
    Coalesced,
    Rebuilt { posts: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KbStats {
    pub ready: bool,
    pub posts: usize,
    pub records: usize,
    pub dimension: Option<usize>,
    pub last_rebuild: Option<DateTime<Utc>>,
    pub sync_policy: SyncPolicy,
    pub provider: String,
}

#[derive(Debug)]
struct KbState {
    mirror: PostMirror,
    index: VectorIndex,
    last_rebuild: DateTime<Utc>,
}

pub struct KnowledgeBase {
    source: Arc<dyn PostSource>,
    provider: Arc<dyn EmbeddingProvider>,
    settings: KbSettings,
    /// `None` until the first successful rebuild
    state: RwLock<Option<KbState>>,
    /// Sequence number of the last completed rebuild
    sync: Mutex<u64>,
    /// Rebuilds started so far
    rebuilds_started: AtomicU64,
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("provider", &self.provider.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl KnowledgeBase {
    #[inline]
    pub fn new(
        source: Arc<dyn PostSource>,
        provider: Arc<dyn EmbeddingProvider>,
        settings: KbSettings,
    ) -> Self {
        Self {
            source,
            provider,
            settings,
            state: RwLock::new(None),
            sync: Mutex::new(0),
            rebuilds_started: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn settings(&self) -> &KbSettings {
        &self.settings
    }

    #[inline]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Health-check the provider, then build the index from the store
    #[inline]
    pub async fn initialize(&self) -> Result<RebuildOutcome> {
        info!(
            "Initializing knowledge base with provider {}",
            self.provider.name()
        );

        self.call_provider(self.provider.health_check())
            .await
            .map_err(|e| {
                KbError::Config(format!(
                    "embedding provider {} is unavailable: {e}",
                    self.provider.name()
                ))
            })?;

        let outcome = self.resync().await?;
        info!("Knowledge base ready ({:?})", outcome);
        Ok(outcome)
    }

    #[inline]
    pub async fn is_ready(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Reload every active post from the store and swap in a fresh index
    ///
    /// Requests are serialized. A request that waited while a rebuild started
    /// after its arrival completed successfully returns
    /// [`RebuildOutcome::Coalesced`] without doing any work. On failure the
    /// live state is left untouched.
    #[inline]
    pub async fn resync(&self) -> Result<RebuildOutcome> {
        let ticket = self.rebuilds_started.load(Ordering::SeqCst);
        let mut last_completed = self.sync.lock().await;

        if *last_completed > ticket {
            debug!(
                "Rebuild request coalesced into rebuild #{}",
                *last_completed
            );
            return Ok(RebuildOutcome::Coalesced);
        }

        let seq = self.rebuilds_started.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Starting rebuild #{}", seq);

        let posts = self.rebuild_locked().await.inspect_err(|e| {
            error!("Rebuild #{} failed, keeping previous index: {}", seq, e);
        })?;

        *last_completed = seq;
        info!("Rebuild #{} indexed {} posts", seq, posts);
        Ok(RebuildOutcome::Rebuilt { posts })
    }

    /// Embed a new active post and add it to the mirror and the index
    ///
    /// Re-adding an existing id replaces its record in place. The store's
    /// current version is what gets indexed; a post that was deleted or
    /// deactivated before the sync guard was acquired is dropped instead.
    #[inline]
    pub async fn add_post(&self, post: &Post) -> Result<()> {
        if !post.active {
            return Err(KbError::InvalidInput(format!(
                "post {} is inactive and cannot be added",
                post.id
            )));
        }
        if post.id.trim().is_empty() {
            return Err(KbError::InvalidInput("post id must not be empty".to_string()));
        }

        let _guard = self.sync.lock().await;
        self.ensure_initialized().await?;
        self.reconcile_locked(&post.id).await
    }

    /// Bring an edited post into the index according to the sync policy
    ///
    /// Under [`SyncPolicy::Patch`] the store's current version of the post
    /// wins over `post`.
    #[inline]
    pub async fn update_post(&self, post: &Post) -> Result<()> {
        match self.settings.sync_policy {
            SyncPolicy::FullRebuild => {
                self.ensure_initialized().await?;
                self.resync().await.map(|_| ())
            }
            SyncPolicy::Patch => {
                let _guard = self.sync.lock().await;
                self.ensure_initialized().await?;
                self.reconcile_locked(&post.id).await
            }
        }
    }

    /// Drop a deleted or deactivated post according to the sync policy
    #[inline]
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        match self.settings.sync_policy {
            SyncPolicy::FullRebuild => {
                self.ensure_initialized().await?;
                self.resync().await.map(|_| ())
            }
            SyncPolicy::Patch => {
                let _guard = self.sync.lock().await;
                self.ensure_initialized().await?;
                self.remove_locked(post_id).await;
                Ok(())
            }
        }
    }

    /// The `top_k` active posts closest to `query`
    #[inline]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(KbError::InvalidInput("top_k must be at least 1".to_string()));
        }
        if query.trim().is_empty() {
            return Err(KbError::InvalidInput("query must not be empty".to_string()));
        }

        let index_is_empty = {
            let guard = self.state.read().await;
            match guard.as_ref() {
                None => return Err(KbError::NotInitialized),
                Some(state) => state.index.is_empty(),
            }
        };
        if index_is_empty {
            debug!("Index is empty, skipping query embedding");
            return Ok(Vec::new());
        }

        let query_vector = self.embed_one(query).await?;

        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(KbError::NotInitialized)?;
        collect_results(
            &state.index,
            &state.mirror,
            &query_vector,
            top_k,
            self.settings.snippet_length,
        )
    }

    /// Validate a public search request and wrap the hits in a response
    #[inline]
    pub async fn search_request(&self, request: &SearchRequest) -> Result<SearchResponse> {
        request.validate()?;
        let results = self.search(&request.query, request.top_k).await?;
        Ok(SearchResponse::from_results(request.query.clone(), results))
    }

    #[inline]
    pub async fn stats(&self) -> KbStats {
        let guard = self.state.read().await;
        match guard.as_ref() {
            Some(state) => KbStats {
                ready: true,
                posts: state.mirror.len(),
                records: state.index.len(),
                dimension: state.index.dimension(),
                last_rebuild: Some(state.last_rebuild),
                sync_policy: self.settings.sync_policy,
                provider: self.provider.name().to_string(),
            },
            None => KbStats {
                ready: false,
                posts: 0,
                records: 0,
                dimension: None,
                last_rebuild: None,
                sync_policy: self.settings.sync_policy,
                provider: self.provider.name().to_string(),
            },
        }
    }

    /// Compare the in-memory mirror with the index
    #[inline]
    pub async fn consistency_report(&self) -> Result<ConsistencyReport> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(KbError::NotInitialized)?;
        Ok(ConsistencyReport::compare(
            state.mirror.posts(),
            &state.index,
        ))
    }

    /// Compare the store's current active posts with the index
    ///
    /// Detects drift caused by writers that never notified this instance.
    #[inline]
    pub async fn verify_against_store(&self) -> Result<ConsistencyReport> {
        let posts = self
            .source
            .list_active_posts()
            .await
            .map_err(|e| KbError::Database(format!("{e:#}")))?;

        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(KbError::NotInitialized)?;
        Ok(ConsistencyReport::compare(&posts, &state.index))
    }

    /// Resync every `interval` until `shutdown` flips to `true`
    ///
    /// Failures are logged and the previous index stays live.
    #[inline]
    pub fn spawn_periodic_resync(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let kb = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            info!("Periodic resync every {:?}", interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match kb.resync().await {
                            Ok(outcome) => debug!("Periodic resync finished: {:?}", outcome),
                            Err(e) => warn!("Periodic resync failed: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Stopping periodic resync");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.state.read().await.is_none() {
            return Err(KbError::NotInitialized);
        }
        Ok(())
    }

    /// Build a fresh mirror and index off to the side, then swap them in
    async fn rebuild_locked(&self) -> Result<usize> {
        let posts: Vec<Post> = self
            .source
            .list_active_posts()
            .await
            .map_err(|e| KbError::Database(format!("{e:#}")))?
            .into_iter()
            .filter(|p| p.active)
            .collect();

        let texts: Vec<String> = posts.iter().map(Post::embedding_text).collect();
        let vectors = self.embed_texts(&texts).await?;

        let mut index = VectorIndex::new();
        for ((post, text), vector) in posts.iter().zip(texts).zip(vectors) {
            index.insert(EmbeddingRecord {
                post_id: post.id.clone(),
                vector,
                source_text: text,
            })?;
        }

        let count = posts.len();
        let mirror = PostMirror::from_posts(posts);

        let mut state = self.state.write().await;
        *state = Some(KbState {
            mirror,
            index,
            last_rebuild: Utc::now(),
        });

        Ok(count)
    }

    /// Index the store's active version of `post_id`, or drop it when there is none
    async fn reconcile_locked(&self, post_id: &str) -> Result<()> {
        let current = self
            .source
            .get_post(post_id)
            .await
            .map_err(|e| KbError::Database(format!("{e:#}")))?
            .filter(|p| p.active);

        match current {
            Some(post) => self.upsert_locked(post).await,
            None => {
                debug!("Post {} is no longer active in the store", post_id);
                self.remove_locked(post_id).await;
                Ok(())
            }
        }
    }

    async fn upsert_locked(&self, post: Post) -> Result<()> {
        let source_text = post.embedding_text();
        let vector = self.embed_one(&source_text).await?;

        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(KbError::NotInitialized)?;

        let replaced = state.index.insert(EmbeddingRecord {
            post_id: post.id.clone(),
            vector,
            source_text,
        })?;
        debug!(
            "{} post {} in the index",
            if replaced { "Replaced" } else { "Added" },
            post.id
        );
        state.mirror.upsert(post);

        Ok(())
    }

    async fn remove_locked(&self, post_id: &str) {
        let mut guard = self.state.write().await;
        if let Some(state) = guard.as_mut() {
            let removed = state.index.remove(post_id);
            state.mirror.remove(post_id);
            debug!("Removed post {} from the index: {}", post_id, removed);
        }
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.call_provider(self.provider.embed(text)).await?;
        validate_vector(&vector)?;
        Ok(vector)
    }

    /// Embed in chunks of `batch_size`; any failure fails the whole batch
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.settings.batch_size.max(1)) {
            let batch = self.call_provider(self.provider.embed_batch(chunk)).await?;
            if batch.len() != chunk.len() {
                return Err(KbError::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    batch.len(),
                    chunk.len()
                )));
            }
            for vector in &batch {
                validate_vector(vector)?;
            }
            vectors.extend(batch);
        }

        Ok(vectors)
    }

    async fn call_provider<T>(
        &self,
        call: impl Future<Output = anyhow::Result<T>> + Send,
    ) -> Result<T> {
        let timeout = self.settings.embedding_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(KbError::Embedding(format!("{e:#}"))),
            Err(_) => Err(KbError::Embedding(format!(
                "{} did not answer within {:?}",
                self.provider.name(),
                timeout
            ))),
        }
    }
}
