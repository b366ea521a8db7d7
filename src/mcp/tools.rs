//! Knowledge base tools exposed over MCP

use crate::config::MAX_TOP_K;
use crate::database::models::{NewPost, parse_tag_list};
use crate::kb::KnowledgeBase;
use crate::kb::sync::PostSync;
use crate::mcp::protocol::*;
use crate::mcp::server::{McpServer, ToolHandler};
use crate::retrieval::{AddPostResponse, SearchRequest};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

pub const SEARCH_TOOL: &str = "search_knowledge_base";
pub const ADD_POST_TOOL: &str = "add_post_to_knowledge_base";

/// Semantic search over the indexed posts
pub struct SearchKnowledgeBaseHandler {
    kb: Arc<KnowledgeBase>,
    default_top_k: usize,
}

/// Persist a new post and index it
pub struct AddPostHandler {
    sync: PostSync,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    top_k: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AddPostArgs {
    title: String,
    content: String,
    #[serde(default)]
    tags: Option<TagsArg>,
    #[serde(default)]
    post_id: Option<String>,
}

/// Tags arrive either as a list or as one comma-separated string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagsArg {
    List(Vec<String>),
    Joined(String),
}

impl TagsArg {
    fn into_tags(self) -> Vec<String> {
        match self {
            Self::List(tags) => tags
                .into_iter()
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            Self::Joined(raw) => parse_tag_list(&raw),
        }
    }
}

fn parse_arguments<T: DeserializeOwned>(
    arguments: Option<HashMap<String, Value>>,
) -> std::result::Result<T, String> {
    let object = arguments.unwrap_or_default().into_iter().collect();
    serde_json::from_value(Value::Object(object)).map_err(|e| format!("Invalid arguments: {e}"))
}

impl SearchKnowledgeBaseHandler {
    #[inline]
    pub fn new(kb: Arc<KnowledgeBase>, default_top_k: usize) -> Self {
        Self {
            kb,
            default_top_k: default_top_k.clamp(1, MAX_TOP_K),
        }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: SEARCH_TOOL.to_string(),
            description: Some(
                "Search the knowledge base for posts semantically related to a query".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural-language search query"
                    },
                    "top_k": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_TOP_K,
                        "description": "Maximum number of results (default: 3)"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    fn request(&self, args: SearchArgs) -> std::result::Result<SearchRequest, String> {
        let top_k = match args.top_k {
            None => self.default_top_k,
            Some(value) => usize::try_from(value)
                .map_err(|_| format!("top_k must be between 1 and {MAX_TOP_K}, got {value}"))?,
        };

        let request = SearchRequest::new(args.query, top_k);
        request.validate().map_err(|e| e.to_string())?;
        Ok(request)
    }
}

#[async_trait]
impl ToolHandler for SearchKnowledgeBaseHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let request = match parse_arguments::<SearchArgs>(params.arguments)
            .and_then(|args| self.request(args))
        {
            Ok(request) => request,
            Err(message) => return Ok(CallToolResult::error(message)),
        };

        debug!(
            "Searching knowledge base: query='{}', top_k={}",
            request.query, request.top_k
        );

        match self.kb.search_request(&request).await {
            Ok(response) => Ok(CallToolResult::text(serde_json::to_string_pretty(
                &response,
            )?)),
            Err(e) => {
                error!("Search failed: {}", e);
                Ok(CallToolResult::error(format!("Search error: {e}")))
            }
        }
    }
}

impl AddPostHandler {
    #[inline]
    pub fn new(sync: PostSync) -> Self {
        Self { sync }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: ADD_POST_TOOL.to_string(),
            description: Some(
                "Add a post to the knowledge base so it becomes searchable. \
                 An existing post with the same post_id is overwritten."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Post title"
                    },
                    "content": {
                        "type": "string",
                        "description": "Post body"
                    },
                    "tags": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional tags"
                    },
                    "post_id": {
                        "type": "string",
                        "description": "Optional identifier; generated when omitted, overwrites an existing post when taken"
                    }
                },
                "required": ["title", "content"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for AddPostHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = match parse_arguments::<AddPostArgs>(params.arguments) {
            Ok(args) => args,
            Err(message) => return Ok(CallToolResult::error(message)),
        };

        let tags = args.tags.map(TagsArg::into_tags).unwrap_or_default();
        let mut new_post = NewPost::new(args.title, args.content, tags);
        if let Some(id) = args.post_id.filter(|id| !id.trim().is_empty()) {
            new_post = new_post.with_id(id.trim());
        }

        match self.sync.upsert_post(new_post).await {
            Ok(post) => {
                debug!("Added post {} through MCP", post.id);
                let response = AddPostResponse::success(&post);
                Ok(CallToolResult::text(serde_json::to_string_pretty(
                    &response,
                )?))
            }
            Err(e) => {
                error!("Failed to add post: {}", e);
                Ok(CallToolResult::error(format!("Failed to add post: {e}")))
            }
        }
    }
}

/// Register both knowledge base tools on `server`
#[inline]
pub async fn register_knowledge_base_tools(
    server: &McpServer,
    sync: PostSync,
    default_top_k: usize,
) {
    let kb = Arc::clone(sync.knowledge_base());
    server
        .register_tool(
            SearchKnowledgeBaseHandler::tool_definition(),
            SearchKnowledgeBaseHandler::new(kb, default_top_k),
        )
        .await;
    server
        .register_tool(AddPostHandler::tool_definition(), AddPostHandler::new(sync))
        .await;
}
