//! OpenAI credential resolution
//!
//! An active `openai` key stored in the database wins over the
//! `OPENAI_API_KEY` environment variable. Blank values count as absent.

#[cfg(test)]
mod tests;

use tracing::{debug, warn};

use crate::database::Database;
use crate::database::models::KeyType;
use crate::{KbError, Result};

pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

/// Where a resolved key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Database,
    Environment,
}

/// Pick the first non-blank candidate, stored key first
#[inline]
pub fn choose_key(stored: Option<String>, env: Option<String>) -> Option<(String, KeySource)> {
    let non_blank = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    non_blank(stored)
        .map(|k| (k, KeySource::Database))
        .or_else(|| non_blank(env).map(|k| (k, KeySource::Environment)))
}

/// Resolve the OpenAI key, consulting `database` first when one is available
///
/// A database that cannot be read is logged and skipped; only the absence of
/// any usable key is an error.
#[inline]
pub async fn resolve_openai_key(database: Option<&Database>) -> Result<String> {
    let stored = match database {
        Some(db) => match db.active_api_key(KeyType::OpenAi).await {
            Ok(key) => key.map(|k| k.key_value),
            Err(e) => {
                warn!("Could not load API key from database: {:#}", e);
                None
            }
        },
        None => None,
    };

    let env = std::env::var(OPENAI_KEY_ENV).ok();

    match choose_key(stored, env) {
        Some((key, source)) => {
            debug!("Using OpenAI API key from {:?}", source);
            Ok(key)
        }
        None => Err(KbError::Config(format!(
            "{OPENAI_KEY_ENV} not found. Store a key with `postkb key set openai <name>` or set the environment variable"
        ))),
    }
}
