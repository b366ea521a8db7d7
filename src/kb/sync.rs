//! Store-coupled mutations: persist first, then notify the knowledge base
//!
//! When the store write succeeds but the knowledge base rejects the change,
//! the error is returned and the write stays. The next resync repairs the
//! index from the store.

use std::sync::Arc;
use tracing::{debug, warn};

use super::KnowledgeBase;
use super::post::Post;
use crate::database::Database;
use crate::database::models::{NewPost, PostUpdate};
use crate::{KbError, Result};

#[derive(Debug, Clone)]
pub struct PostSync {
    database: Database,
    kb: Arc<KnowledgeBase>,
}

impl PostSync {
    #[inline]
    pub fn new(database: Database, kb: Arc<KnowledgeBase>) -> Self {
        Self { database, kb }
    }

    #[inline]
    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    #[inline]
    pub async fn create_post(&self, new_post: NewPost) -> Result<Post> {
        new_post.validate().map_err(KbError::InvalidInput)?;

        let post = self
            .database
            .create_post(new_post)
            .await
            .map_err(|e| KbError::Database(format!("{e:#}")))?;
        debug!("Persisted post {}", post.id);

        notify(&post.id, self.kb.add_post(&post).await)?;
        Ok(post)
    }

    /// Create the post, or overwrite the stored post that has the same id
    ///
    /// An overwrite keeps the id and creation time, reactivates the post and
    /// replaces its index record in place.
    #[inline]
    pub async fn upsert_post(&self, new_post: NewPost) -> Result<Post> {
        new_post.validate().map_err(KbError::InvalidInput)?;

        let existing = match new_post.id.as_deref() {
            Some(id) => self
                .database
                .get_post(id)
                .await
                .map_err(|e| KbError::Database(format!("{e:#}")))?,
            None => None,
        };
        let Some(existing) = existing else {
            return self.create_post(new_post).await;
        };

        let update = PostUpdate {
            title: Some(new_post.title),
            content: Some(new_post.content),
            tags: Some(new_post.tags),
            is_active: Some(true),
        };
        let post = self
            .database
            .update_post(&existing.id, update)
            .await
            .map_err(|e| KbError::Database(format!("{e:#}")))?
            .ok_or_else(|| {
                KbError::Database(format!("post {} was deleted while overwriting it", existing.id))
            })?;
        debug!("Overwrote post {}", post.id);

        notify(&post.id, self.kb.add_post(&post).await)?;
        Ok(post)
    }

    /// Returns `None` when no post has this id
    #[inline]
    pub async fn update_post(&self, id: &str, update: PostUpdate) -> Result<Option<Post>> {
        update.validate().map_err(KbError::InvalidInput)?;

        let Some(post) = self
            .database
            .update_post(id, update)
            .await
            .map_err(|e| KbError::Database(format!("{e:#}")))?
        else {
            return Ok(None);
        };

        notify(id, self.kb.update_post(&post).await)?;
        Ok(Some(post))
    }

    /// Hard delete; returns whether the post existed
    #[inline]
    pub async fn delete_post(&self, id: &str) -> Result<bool> {
        let deleted = self
            .database
            .delete_post(id)
            .await
            .map_err(|e| KbError::Database(format!("{e:#}")))?;

        if deleted {
            notify(id, self.kb.delete_post(id).await)?;
        }
        Ok(deleted)
    }

    /// Soft delete: the post stays in the store but leaves the index
    #[inline]
    pub async fn deactivate_post(&self, id: &str) -> Result<Option<Post>> {
        let Some(post) = self
            .database
            .set_post_active(id, false)
            .await
            .map_err(|e| KbError::Database(format!("{e:#}")))?
        else {
            return Ok(None);
        };

        notify(id, self.kb.delete_post(id).await)?;
        Ok(Some(post))
    }
}

fn notify(id: &str, outcome: Result<()>) -> Result<()> {
    outcome.inspect_err(|e| {
        warn!(
            "Post {} was saved but the knowledge base was not updated: {}",
            id, e
        );
    })
}
