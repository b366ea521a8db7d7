
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, EmbeddingConfig, OllamaConfig, OpenAiConfig, ProviderKind, SyncPolicy};

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 postkb Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Embedding Provider").bold().yellow());
    eprintln!("Choose the service that turns posts and queries into vectors.");
    eprintln!();

    configure_embedding(&mut config.embedding)?;

    eprintln!();
    eprintln!("{}", style("Knowledge Base").bold().yellow());
    configure_sync_policy(&mut config)?;

    if config.embedding.provider == ProviderKind::Ollama {
        eprintln!();
        eprintln!("{}", style("Testing configuration...").yellow());

        if test_ollama_connection(&config.embedding.ollama) {
            eprintln!("{}", style("✓ Ollama connection successful!").green());
        } else {
            eprintln!(
                "{}",
                style("⚠ Warning: Could not connect to Ollama").yellow()
            );
            eprintln!("You can continue, but the knowledge base will refuse to start without it.");
        }
    } else {
        eprintln!();
        eprintln!(
            "Store the OpenAI key with {} or export {}.",
            style("postkb key set openai <name>").cyan(),
            style("OPENAI_API_KEY").cyan()
        );
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  Provider: {}", style(config.embedding.provider).cyan());
    eprintln!(
        "  Timeout: {}s",
        style(config.embedding.timeout_seconds).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());

    match config.embedding.provider {
        ProviderKind::OpenAi => {
            eprintln!("  Base URL: {}", style(&config.embedding.openai.base_url).cyan());
            eprintln!("  Model: {}", style(&config.embedding.openai.model).cyan());
        }
        ProviderKind::Ollama => {
            match config.ollama_url() {
                Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
                Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
            }
            eprintln!("  Model: {}", style(&config.embedding.ollama.model).cyan());
        }
    }

    eprintln!();
    eprintln!("{}", style("Knowledge Base Settings:").bold().yellow());
    eprintln!(
        "  Sync Policy: {}",
        style(config.knowledge_base.sync_policy).cyan()
    );
    eprintln!(
        "  Snippet Length: {}",
        style(config.knowledge_base.snippet_length).cyan()
    );
    eprintln!(
        "  Default top_k: {}",
        style(config.knowledge_base.default_top_k).cyan()
    );
    eprintln!(
        "  Resync Interval: {}",
        style(match config.knowledge_base.resync_interval() {
            Some(interval) => format!("{}s", interval.as_secs()),
            None => "disabled".to_string(),
        })
        .cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config() -> Result<Config> {
    let config_dir = Config::config_dir()?;
    Config::load(&config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No usable configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.clone(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_embedding(embedding: &mut EmbeddingConfig) -> Result<()> {
    let providers = &["openai", "ollama"];
    let default_index = match embedding.provider {
        ProviderKind::OpenAi => 0,
        ProviderKind::Ollama => 1,
    };

    let provider_index = Select::new()
        .with_prompt("Embedding provider")
        .default(default_index)
        .items(providers)
        .interact()?;

    if provider_index == 0 {
        embedding.provider = ProviderKind::OpenAi;
        configure_openai(&mut embedding.openai)?;
    } else {
        embedding.provider = ProviderKind::Ollama;
        configure_ollama(&mut embedding.ollama)?;
    }

    let timeout: u64 = Input::new()
        .with_prompt("Embedding request timeout (seconds)")
        .default(embedding.timeout_seconds)
        .validate_with(|input: &u64| -> Result<(), &str> {
            if (1..=600).contains(input) {
                Ok(())
            } else {
                Err("Timeout must be between 1 and 600 seconds")
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(embedding.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    embedding.set_timeout_seconds(timeout)?;
    embedding.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_openai(openai: &mut OpenAiConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("OpenAI-compatible base URL")
        .default(openai.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            OpenAiConfig {
                base_url: input.clone(),
                ..OpenAiConfig::default()
            }
            .validate()
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(openai.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    openai.set_base_url(base_url)?;
    openai.set_model(model)?;

    Ok(())
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            }
            .validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;

    Ok(())
}

fn configure_sync_policy(config: &mut Config) -> Result<()> {
    let policies = &[
        "full_rebuild (re-embed everything on edit/delete)",
        "patch (re-embed only the touched post)",
    ];
    let default_index = match config.knowledge_base.sync_policy {
        SyncPolicy::FullRebuild => 0,
        SyncPolicy::Patch => 1,
    };

    let policy_index = Select::new()
        .with_prompt("Index sync policy")
        .default(default_index)
        .items(policies)
        .interact()?;

    config.knowledge_base.sync_policy = if policy_index == 0 {
        SyncPolicy::FullRebuild
    } else {
        SyncPolicy::Patch
    };

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => true,
        Err(_) => false,
    }
}
