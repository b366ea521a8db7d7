// Configuration management module
// TOML settings for the embedding provider and the knowledge base

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, EmbeddingConfig, KnowledgeBaseConfig, MAX_TOP_K, OllamaConfig,
    OpenAiConfig, ProviderKind, SyncPolicy,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
