
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::str::FromStr;
use tracing::warn;

use crate::kb::post::Post;

pub const MAX_TITLE_LENGTH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PostRow {
    pub id: String,
    pub title: String,
    pub content: String,
    /// JSON array of tag strings
    pub tags: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl PostRow {
    #[inline]
    pub fn tag_list(&self) -> Vec<String> {
        decode_tags(&self.tags)
    }

    #[inline]
    pub fn into_post(self) -> Post {
        let tags = decode_tags(&self.tags);
        Post {
            id: self.id,
            title: self.title,
            content: self.content,
            tags,
            active: self.is_active,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    /// Generated when absent
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

impl NewPost {
    #[inline]
    pub fn new(title: impl Into<String>, content: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            content: content.into(),
            tags,
        }
    }

    #[inline]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[inline]
    pub fn validate(&self) -> Result<(), String> {
        validate_title(&self.title)?;
        validate_content(&self.content)?;
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err("post id must not be blank".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl PostUpdate {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.is_active.is_none()
    }

    #[inline]
    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(content) = &self.content {
            validate_content(content)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    OpenAi,
    Google,
}

impl std::fmt::Display for KeyType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            KeyType::OpenAi => write!(f, "openai"),
            KeyType::Google => write!(f, "google"),
        }
    }
}

impl FromStr for KeyType {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(KeyType::OpenAi),
            "google" => Ok(KeyType::Google),
            other => Err(format!(
                "unknown key type '{other}', expected 'openai' or 'google'"
            )),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: i64,
    pub key_type: KeyType,
    pub key_name: String,
    pub key_value: String,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("id", &self.id)
            .field("key_type", &self.key_type)
            .field("key_name", &self.key_name)
            .field("key_value", &self.masked_value())
            .field("is_active", &self.is_active)
            .field("description", &self.description)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl ApiKey {
    #[inline]
    pub fn masked_value(&self) -> String {
        mask_key_value(&self.key_value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApiKey {
    pub key_type: KeyType,
    pub key_name: String,
    pub key_value: String,
    pub description: Option<String>,
}

impl NewApiKey {
    #[inline]
    pub fn validate(&self) -> Result<(), String> {
        if self.key_name.trim().is_empty() {
            return Err("key name must not be empty".to_string());
        }
        if self.key_value.trim().is_empty() {
            return Err("key value must not be empty".to_string());
        }
        Ok(())
    }
}

/// Counts of stored posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PostCounts {
    pub total: i64,
    pub active: i64,
}

impl PostCounts {
    #[inline]
    pub fn inactive(&self) -> i64 {
        self.total - self.active
    }
}

/// Hide a credential for display: `****` up to 8 characters, else `abcd...wxyz`
#[inline]
pub fn mask_key_value(value: &str) -> String {
    let len = value.chars().count();
    if len <= 8 {
        return "****".to_string();
    }

    let head: String = value.chars().take(4).collect();
    let tail: String = value.chars().skip(len - 4).collect();
    format!("{head}...{tail}")
}

#[inline]
pub fn encode_tags(tags: &[String]) -> String {
    let cleaned: Vec<&str> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    serde_json::to_string(&cleaned).unwrap_or_else(|_| "[]".to_string())
}

#[inline]
pub fn decode_tags(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(tags) => tags,
        Err(e) => {
            warn!("Ignoring malformed tags column {:?}: {}", raw, e);
            Vec::new()
        }
    }
}

/// Split a comma separated tag list as typed on the command line
#[inline]
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_title(title: &str) -> Result<(), String> {
    let len = title.trim().chars().count();
    if len == 0 {
        return Err("title must not be empty".to_string());
    }
    if len > MAX_TITLE_LENGTH {
        return Err(format!(
            "title must be at most {MAX_TITLE_LENGTH} characters, got {len}"
        ));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("content must not be empty".to_string());
    }
    Ok(())
}
