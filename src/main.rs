use clap::{Parser, Subcommand};
use postkb::Result;
use postkb::commands::{
    add_post, deactivate_post, delete_api_key, delete_post, list_api_keys, list_posts, search,
    seed_posts, serve_mcp, set_api_key, show_post, show_status, update_post,
};
use postkb::config::{run_interactive_config, show_config};
use postkb::database::models::KeyType;

#[derive(Parser)]
#[command(name = "postkb")]
#[command(about = "A semantic knowledge base over short posts, served as MCP tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding provider and knowledge base settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Manage stored posts
    #[command(subcommand)]
    Post(PostCommand),
    /// Manage embedding provider API keys
    #[command(subcommand)]
    Key(KeyCommand),
    /// Build the knowledge base and run one semantic search
    Search {
        query: String,
        /// Number of results, between 1 and 20
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },
    /// Show store counts, index statistics and consistency
    Status,
    /// Insert the sample posts into an empty store
    Seed,
    /// Start MCP server on stdio
    Serve,
}

#[derive(Subcommand)]
enum PostCommand {
    /// Add a post
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Explicit post ID; a UUID is generated otherwise
        #[arg(long)]
        id: Option<String>,
    },
    /// List posts
    List {
        /// Include deactivated posts
        #[arg(long)]
        all: bool,
    },
    /// Show one post
    Show { id: String },
    /// Edit a post
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        /// Comma-separated tags, replacing the current ones
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    /// Permanently delete a post
    Delete { id: String },
    /// Hide a post from search without deleting it
    Deactivate { id: String },
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Store an API key; prompts for the value when --value is omitted
    Set {
        /// Key type: openai or google
        key_type: KeyType,
        name: String,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List stored keys with masked values
    List,
    /// Delete a stored key
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for command output and the MCP channel
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Post(command) => match command {
            PostCommand::Add {
                title,
                content,
                tags,
                id,
            } => add_post(title, content, tags, id).await?,
            PostCommand::List { all } => list_posts(all).await?,
            PostCommand::Show { id } => show_post(&id).await?,
            PostCommand::Update {
                id,
                title,
                content,
                tags,
                active,
            } => update_post(&id, title, content, tags, active).await?,
            PostCommand::Delete { id } => delete_post(&id).await?,
            PostCommand::Deactivate { id } => deactivate_post(&id).await?,
        },
        Commands::Key(command) => match command {
            KeyCommand::Set {
                key_type,
                name,
                value,
                description,
            } => {
                let value = match value {
                    Some(value) => value,
                    None => dialoguer::Password::new()
                        .with_prompt(format!("{} API key", key_type))
                        .interact()
                        .map_err(anyhow::Error::from)?,
                };
                set_api_key(key_type, name, value, description).await?;
            }
            KeyCommand::List => list_api_keys().await?,
            KeyCommand::Delete { id } => delete_api_key(id).await?,
        },
        Commands::Search { query, top_k } => {
            search(query, top_k).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
        Commands::Seed => {
            seed_posts().await?;
        }
        Commands::Serve => {
            serve_mcp().await?;
        }
    }

    Ok(())
}
