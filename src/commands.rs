use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{Config, MAX_TOP_K, ProviderKind};
use crate::database::Database;
use crate::database::models::{KeyType, NewApiKey, NewPost, PostUpdate, parse_tag_list};
use crate::embeddings::credentials::resolve_openai_key;
use crate::embeddings::create_provider;
use crate::kb::sync::PostSync;
use crate::kb::{KbSettings, KnowledgeBase, Post, sample_posts};
use crate::mcp::{McpServer, register_knowledge_base_tools};
use crate::retrieval::SearchRequest;

/// Open the post store that lives next to the configuration file
#[inline]
pub async fn open_database(config: &Config) -> Result<Database> {
    Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")
}

/// Wire the configured embedding provider to the post store
///
/// The knowledge base is returned uninitialized.
#[inline]
pub async fn build_knowledge_base(
    config: &Config,
    database: &Database,
) -> crate::Result<Arc<KnowledgeBase>> {
    let openai_key = match config.embedding.provider {
        ProviderKind::OpenAi => Some(resolve_openai_key(Some(database)).await?),
        ProviderKind::Ollama => None,
    };
    let provider = create_provider(config, openai_key)?;

    Ok(Arc::new(KnowledgeBase::new(
        Arc::new(database.clone()),
        provider,
        KbSettings::from_config(config),
    )))
}

async fn initialize_with_spinner(kb: &KnowledgeBase) -> crate::Result<()> {
    let bar = if console::user_attended_stderr() {
        ProgressStyle::with_template("{spinner} {msg}")
            .map(|style| ProgressBar::new_spinner().with_style(style))
            .unwrap_or_else(|_| ProgressBar::new_spinner())
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(format!("Embedding posts with {}", kb.provider_name()));
    bar.enable_steady_tick(Duration::from_millis(120));

    let outcome = kb.initialize().await;
    bar.finish_and_clear();
    outcome.map(|_| ())
}

fn print_post(post: &Post) {
    let state = if post.active { "active" } else { "inactive" };
    println!("{} ({}, {})", post.title, post.id, state);
    if !post.tags.is_empty() {
        println!("   Tags: {}", post.tags.join(", "));
    }
    if let Some(updated_at) = post.updated_at {
        println!("   Updated: {}", updated_at.format("%Y-%m-%d %H:%M:%S"));
    }
}

/// Persist a new post. A running server picks it up on its next resync.
#[inline]
pub async fn add_post(
    title: String,
    content: String,
    tags: Option<String>,
    id: Option<String>,
) -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let tags = tags.as_deref().map(parse_tag_list).unwrap_or_default();
    let mut new_post = NewPost::new(title, content, tags);
    if let Some(id) = id {
        new_post = new_post.with_id(id);
    }
    new_post
        .validate()
        .map_err(|message| anyhow::anyhow!("Invalid post: {}", message))?;

    let post = database.create_post(new_post).await?;
    println!("Created post: {} (ID: {})", post.title, post.id);
    Ok(())
}

#[inline]
pub async fn list_posts(include_inactive: bool) -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let posts = database.list_posts(include_inactive).await?;
    if posts.is_empty() {
        println!("No posts stored yet.");
        println!("Use 'postkb post add' or 'postkb seed' to add some.");
        return Ok(());
    }

    println!("Posts ({} total):", posts.len());
    println!();
    for post in &posts {
        print_post(post);
    }

    Ok(())
}

#[inline]
pub async fn show_post(id: &str) -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let post = database
        .get_post(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Post not found: {}", id))?;

    print_post(&post);
    println!();
    println!("{}", post.content);
    Ok(())
}

#[inline]
pub async fn update_post(
    id: &str,
    title: Option<String>,
    content: Option<String>,
    tags: Option<String>,
    active: Option<bool>,
) -> Result<()> {
    let update = PostUpdate {
        title,
        content,
        tags: tags.as_deref().map(parse_tag_list),
        is_active: active,
    };
    if update.is_empty() {
        anyhow::bail!("Nothing to update; pass at least one of --title, --content, --tags, --active");
    }
    update
        .validate()
        .map_err(|message| anyhow::anyhow!("Invalid update: {}", message))?;

    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let post = database
        .update_post(id, update)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Post not found: {}", id))?;

    println!("Updated post: {} (ID: {})", post.title, post.id);
    Ok(())
}

#[inline]
pub async fn delete_post(id: &str) -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    if database.delete_post(id).await? {
        println!("Deleted post {}", id);
        Ok(())
    } else {
        anyhow::bail!("Post not found: {}", id)
    }
}

#[inline]
pub async fn deactivate_post(id: &str) -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let post = database
        .set_post_active(id, false)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Post not found: {}", id))?;

    println!("Deactivated post: {} (ID: {})", post.title, post.id);
    Ok(())
}

#[inline]
pub async fn set_api_key(
    key_type: KeyType,
    name: String,
    value: String,
    description: Option<String>,
) -> Result<()> {
    let new_key = NewApiKey {
        key_type,
        key_name: name,
        key_value: value,
        description,
    };
    new_key
        .validate()
        .map_err(|message| anyhow::anyhow!("Invalid API key: {}", message))?;

    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let key = database.create_api_key(new_key).await?;
    println!(
        "Stored {} key '{}' (ID: {}): {}",
        key.key_type,
        key.key_name,
        key.id,
        key.masked_value()
    );
    Ok(())
}

#[inline]
pub async fn list_api_keys() -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let keys = database.list_api_keys().await?;
    if keys.is_empty() {
        println!("No API keys stored.");
        return Ok(());
    }

    for key in &keys {
        let state = if key.is_active { "active" } else { "inactive" };
        println!(
            "{:>4}  {:<7} {:<20} {:<16} {}",
            key.id,
            key.key_type.to_string(),
            key.key_name,
            key.masked_value(),
            state
        );
        if let Some(description) = &key.description {
            println!("      {}", description);
        }
    }

    Ok(())
}

#[inline]
pub async fn delete_api_key(id: i64) -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    if database.delete_api_key(id).await? {
        println!("Deleted API key {}", id);
        Ok(())
    } else {
        anyhow::bail!("API key not found: {}", id)
    }
}

/// Insert the sample posts, but only into an empty store
#[inline]
pub async fn seed_posts() -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let counts = database.post_counts().await?;
    if counts.total > 0 {
        println!(
            "Store already holds {} posts; skipping sample data.",
            counts.total
        );
        return Ok(());
    }

    let samples = sample_posts();
    let total = samples.len();
    for post in samples {
        database
            .create_post(NewPost::new(post.title, post.content, post.tags).with_id(post.id))
            .await?;
    }

    println!("Inserted {} sample posts", total);
    Ok(())
}

/// Build the knowledge base and print one search response as JSON
#[inline]
pub async fn search(query: String, top_k: Option<usize>) -> crate::Result<()> {
    let config = Config::load_default()?;
    let request = SearchRequest::new(
        query,
        top_k.unwrap_or(config.knowledge_base.default_top_k),
    );
    request.validate()?;

    let database = open_database(&config).await?;
    let kb = build_knowledge_base(&config, &database).await?;
    initialize_with_spinner(&kb).await?;

    let response = kb.search_request(&request).await?;
    let json = serde_json::to_string_pretty(&response).context("Failed to encode response")?;
    println!("{}", json);
    Ok(())
}

#[inline]
pub async fn show_status() -> Result<()> {
    let config = Config::load_default()?;

    println!("postkb status");
    println!("{}", "=".repeat(40));
    println!();

    let database = match open_database(&config).await {
        Ok(database) => {
            println!("Store: {}", config.database_path().display());
            database
        }
        Err(e) => {
            println!("Store: unavailable ({:#})", e);
            return Ok(());
        }
    };

    let counts = database.post_counts().await?;
    println!(
        "Posts: {} total, {} active, {} inactive",
        counts.total,
        counts.active,
        counts.inactive()
    );
    println!();

    let kb = match build_knowledge_base(&config, &database).await {
        Ok(kb) => kb,
        Err(e) => {
            println!("Knowledge base: not configured ({})", e);
            return Ok(());
        }
    };

    if let Err(e) = initialize_with_spinner(&kb).await {
        println!("Knowledge base: failed to build ({})", e);
        return Ok(());
    }

    let stats = kb.stats().await;
    println!("Knowledge base:");
    println!("   Provider: {}", stats.provider);
    println!("   Sync policy: {}", stats.sync_policy);
    println!("   Indexed posts: {}", stats.records);
    if let Some(dimension) = stats.dimension {
        println!("   Dimension: {}", dimension);
    }
    println!();

    let report = kb.verify_against_store().await?;
    println!("{}", report.summary());
    for id in &report.missing_in_index {
        println!("   missing from index: {}", id);
    }
    for id in &report.orphaned_in_index {
        println!("   orphaned in index: {}", id);
    }
    for id in &report.stale_records {
        println!("   stale embedding: {}", id);
    }

    Ok(())
}

/// Build the knowledge base, then answer MCP requests on stdio until EOF or Ctrl+C
///
/// Stdout carries the protocol, so nothing else may be printed there.
#[inline]
pub async fn serve_mcp() -> crate::Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;

    let kb = build_knowledge_base(&config, &database).await?;
    kb.initialize().await.inspect_err(|e| {
        error!("Knowledge base failed to initialize: {}", e);
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let resync_task = config
        .knowledge_base
        .resync_interval()
        .map(|interval| kb.spawn_periodic_resync(interval, shutdown_rx));

    let server = McpServer::new(
        "postkb".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    )
    .with_instructions(format!(
        "Search the post knowledge base with search_knowledge_base (top_k 1-{MAX_TOP_K}) \
         and add posts with add_post_to_knowledge_base."
    ));
    register_knowledge_base_tools(
        &server,
        PostSync::new(database, Arc::clone(&kb)),
        config.knowledge_base.default_top_k,
    )
    .await;
    let server = Arc::new(server);

    info!(
        "MCP server ready with tools: {}",
        server.tool_names().await.join(", ")
    );

    tokio::select! {
        result = Arc::clone(&server).serve_stdio() => {
            if let Err(e) = result {
                error!("MCP server error: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt signal, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(task) = resync_task {
        if let Err(e) = task.await {
            error!("Resync task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}
