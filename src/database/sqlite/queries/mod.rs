
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

const POST_COLUMNS: &str = "id, title, content, tags, is_active, created_at, updated_at";
const API_KEY_COLUMNS: &str =
    "id, key_type, key_name, key_value, is_active, description, created_at, updated_at";

pub struct PostQueries;

impl PostQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_post: NewPost) -> Result<PostRow> {
        new_post
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid post: {e}"))?;

        let id = new_post
            .id
            .map(|id| id.trim().to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO posts (id, title, content, tags, is_active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&id)
        .bind(new_post.title.trim())
        .bind(&new_post.content)
        .bind(encode_tags(&new_post.tags))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to create post {id}"))?;

        debug!("Created post {}", id);

        Self::get_by_id(pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created post"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<PostRow>> {
        let result = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get post by id")?;

        Ok(result)
    }

    /// Posts in creation order; ties fall back to id so the order is total
    #[inline]
    pub async fn list(pool: &SqlitePool, include_inactive: bool) -> Result<Vec<PostRow>> {
        let filter = if include_inactive {
            ""
        } else {
            "WHERE is_active = 1"
        };

        let posts = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts {filter} ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list posts")?;

        Ok(posts)
    }

    #[inline]
    pub async fn update(pool: &SqlitePool, id: &str, update: PostUpdate) -> Result<Option<PostRow>> {
        update
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid post update: {e}"))?;

        let Some(current) = Self::get_by_id(pool, id).await? else {
            return Ok(None);
        };

        if update.is_empty() {
            warn!("Empty update requested for post {}", id);
            return Ok(Some(current));
        }

        let title = update
            .title
            .map_or(current.title, |t| t.trim().to_string());
        let content = update.content.unwrap_or(current.content);
        let tags = update
            .tags
            .map_or(current.tags, |tags| encode_tags(&tags));
        let is_active = update.is_active.unwrap_or(current.is_active);
        let now = Utc::now().naive_utc();

        sqlx::query(
            "UPDATE posts SET title = ?, content = ?, tags = ?, is_active = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&title)
        .bind(&content)
        .bind(&tags)
        .bind(is_active)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to update post {id}"))?;

        Self::get_by_id(pool, id).await
    }

    /// Hard delete; returns whether a row was removed
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to delete post {id}"))?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn counts(pool: &SqlitePool) -> Result<PostCounts> {
        let (total, active): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), SUM(CASE WHEN is_active THEN 1 ELSE 0 END) FROM posts")
                .fetch_one(pool)
                .await
                .context("Failed to count posts")?;

        Ok(PostCounts {
            total,
            active: active.unwrap_or(0),
        })
    }
}

pub struct ApiKeyQueries;

impl ApiKeyQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_key: NewApiKey) -> Result<ApiKey> {
        new_key
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid API key: {e}"))?;

        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO api_keys (key_type, key_name, key_value, is_active, description, created_at, updated_at) \
             VALUES (?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(new_key.key_type)
        .bind(new_key.key_name.trim())
        .bind(new_key.key_value.trim())
        .bind(&new_key.description)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create API key")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created API key"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ApiKey>> {
        let result = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get API key by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list(pool: &SqlitePool) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list API keys")?;

        Ok(keys)
    }

    /// The most recently updated active key of `key_type`
    #[inline]
    pub async fn get_active(pool: &SqlitePool, key_type: KeyType) -> Result<Option<ApiKey>> {
        let result = sqlx::query_as::<_, ApiKey>(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys \
             WHERE key_type = ? AND is_active = 1 \
             ORDER BY updated_at DESC, id DESC LIMIT 1"
        ))
        .bind(key_type)
        .fetch_optional(pool)
        .await
        .context("Failed to get active API key")?;

        Ok(result)
    }

    #[inline]
    pub async fn set_active(pool: &SqlitePool, id: i64, active: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE api_keys SET is_active = ?, updated_at = ? WHERE id = ?")
                .bind(active)
                .bind(Utc::now().naive_utc())
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to update API key")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete API key")?;

        Ok(result.rows_affected() > 0)
    }
}
