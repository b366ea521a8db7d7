use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    ApiKey, KeyType, NewApiKey, NewPost, PostCounts, PostRow, PostUpdate,
};
use crate::database::sqlite::queries::{ApiKeyQueries, PostQueries};
use crate::kb::PostSource;
use crate::kb::post::Post;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

pub const DATABASE_FILE_NAME: &str = "posts.db";

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join(DATABASE_FILE_NAME)).await
    }

    // Post operations
    #[inline]
    pub async fn create_post(&self, new_post: NewPost) -> Result<Post> {
        Ok(PostQueries::create(&self.pool, new_post).await?.into_post())
    }

    #[inline]
    pub async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        Ok(PostQueries::get_by_id(&self.pool, id)
            .await?
            .map(PostRow::into_post))
    }

    #[inline]
    pub async fn list_posts(&self, include_inactive: bool) -> Result<Vec<Post>> {
        Ok(PostQueries::list(&self.pool, include_inactive)
            .await?
            .into_iter()
            .map(PostRow::into_post)
            .collect())
    }

    #[inline]
    pub async fn update_post(&self, id: &str, update: PostUpdate) -> Result<Option<Post>> {
        Ok(PostQueries::update(&self.pool, id, update)
            .await?
            .map(PostRow::into_post))
    }

    #[inline]
    pub async fn set_post_active(&self, id: &str, active: bool) -> Result<Option<Post>> {
        let update = PostUpdate {
            is_active: Some(active),
            ..PostUpdate::default()
        };
        self.update_post(id, update).await
    }

    #[inline]
    pub async fn delete_post(&self, id: &str) -> Result<bool> {
        PostQueries::delete(&self.pool, id).await
    }

    #[inline]
    pub async fn post_counts(&self) -> Result<PostCounts> {
        PostQueries::counts(&self.pool).await
    }

    // API key operations
    #[inline]
    pub async fn create_api_key(&self, new_key: NewApiKey) -> Result<ApiKey> {
        ApiKeyQueries::create(&self.pool, new_key).await
    }

    #[inline]
    pub async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        ApiKeyQueries::list(&self.pool).await
    }

    #[inline]
    pub async fn active_api_key(&self, key_type: KeyType) -> Result<Option<ApiKey>> {
        ApiKeyQueries::get_active(&self.pool, key_type).await
    }

    #[inline]
    pub async fn set_api_key_active(&self, id: i64, active: bool) -> Result<bool> {
        ApiKeyQueries::set_active(&self.pool, id, active).await
    }

    #[inline]
    pub async fn delete_api_key(&self, id: i64) -> Result<bool> {
        ApiKeyQueries::delete(&self.pool, id).await
    }
}

#[async_trait]
impl PostSource for Database {
    async fn list_active_posts(&self) -> Result<Vec<Post>> {
        self.list_posts(false).await
    }

    async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        Self::get_post(self, id).await
    }
}
