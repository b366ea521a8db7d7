//! Shared helpers for the integration tests

#![allow(dead_code, reason = "each test binary uses a different subset")]

use anyhow::{Result, bail};
use async_trait::async_trait;
use postkb::config::SyncPolicy;
use postkb::database::Database;
use postkb::database::models::NewPost;
use postkb::embeddings::EmbeddingProvider;
use postkb::kb::{KbSettings, KnowledgeBase, sample_posts};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const DIMENSION: usize = 512;

/// Deterministic bag-of-stems embedder
///
/// Tokens are lowercase alphanumeric runs cut to five characters, hashed with
/// FNV-1a into a fixed number of buckets and L2-normalized.
#[derive(Debug, Default)]
pub struct StemEmbedder {
    pub calls: AtomicUsize,
}

impl StemEmbedder {
    pub fn vector(text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; DIMENSION];
        let mut tokens = 0_usize;

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let stem: String = token.to_lowercase().chars().take(5).collect();
            vector[fnv1a(&stem) % DIMENSION] += 1.0;
            tokens += 1;
        }

        if tokens == 0 {
            bail!("text has no tokens to embed");
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        Ok(vector.into_iter().map(|v| v / norm).collect())
    }
}

fn fnv1a(text: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash as usize
}

#[async_trait]
impl EmbeddingProvider for StemEmbedder {
    fn name(&self) -> &str {
        "test/stems"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Self::vector(text)
    }
}

pub fn settings(sync_policy: SyncPolicy) -> KbSettings {
    KbSettings {
        sync_policy,
        snippet_length: 200,
        embedding_timeout: Duration::from_secs(5),
        batch_size: 2,
    }
}

/// A fresh store in a temporary directory
pub async fn temp_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

pub async fn seed(database: &Database) -> Result<()> {
    for post in sample_posts() {
        database
            .create_post(NewPost::new(post.title, post.content, post.tags).with_id(post.id))
            .await?;
    }
    Ok(())
}

/// Store seeded with the sample posts plus an uninitialized knowledge base over it
pub async fn seeded_knowledge_base(
    sync_policy: SyncPolicy,
) -> Result<(TempDir, Database, Arc<StemEmbedder>, Arc<KnowledgeBase>)> {
    let (temp_dir, database) = temp_database().await?;
    seed(&database).await?;

    let embedder = Arc::new(StemEmbedder::default());
    let kb = Arc::new(KnowledgeBase::new(
        Arc::new(database.clone()),
        Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
        settings(sync_policy),
    ));

    Ok((temp_dir, database, embedder, kb))
}
