use super::protocol::*;
use super::server::{ConnectionState, McpServer};
use super::tools::{ADD_POST_TOOL, SEARCH_TOOL, register_knowledge_base_tools};
use crate::database::Database;
use crate::database::models::NewPost;
use crate::embeddings::EmbeddingProvider;
use crate::kb::sync::PostSync;
use crate::kb::{KbSettings, KnowledgeBase};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const TOPICS: [&str; 3] = ["python", "rust", "garden"];

struct TopicEmbedder;

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn name(&self) -> &str {
        "topic"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = TOPICS
            .iter()
            .map(|topic| lower.matches(topic).count() as f32)
            .collect();
        vector.push(1.0);
        Ok(vector)
    }
}

struct Fixture {
    _temp_dir: TempDir,
    database: Database,
    server: Arc<McpServer>,
}

async fn fixture() -> Result<Fixture> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    database
        .create_post(
            NewPost::new("Virtualenv basics", "python environments", vec!["Python".to_string()])
                .with_id("py"),
        )
        .await?;
    database
        .create_post(NewPost::new("Ownership", "rust borrowing", Vec::new()).with_id("rs"))
        .await?;

    let kb = Arc::new(KnowledgeBase::new(
        Arc::new(database.clone()),
        Arc::new(TopicEmbedder),
        KbSettings::default(),
    ));
    kb.initialize().await?;

    let server = McpServer::new("postkb".to_string(), "test".to_string());
    register_knowledge_base_tools(&server, PostSync::new(database.clone(), kb), 3).await;

    Ok(Fixture {
        _temp_dir: temp_dir,
        database,
        server: Arc::new(server),
    })
}

async fn send(server: &Arc<McpServer>, message: Value) -> Option<Value> {
    server
        .handle_line(&message.to_string())
        .await
        .map(|reply| serde_json::to_value(reply).expect("reply should serialize"))
}

async fn call_tool(server: &Arc<McpServer>, name: &str, arguments: Value) -> Value {
    send(
        server,
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }),
    )
    .await
    .expect("tool calls are answered")
}

fn tool_text(reply: &Value) -> &str {
    reply["result"]["content"][0]["text"]
        .as_str()
        .expect("tool result carries text")
}

fn is_error(reply: &Value) -> bool {
    reply["result"]["isError"].as_bool().unwrap_or(false)
}

#[tokio::test]
async fn initialize_negotiates_supported_versions() -> Result<()> {
    let fixture = fixture().await?;

    let reply = send(
        &fixture.server,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "1.0" }
            }
        }),
    )
    .await
    .expect("initialize is answered");

    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["protocolVersion"], MCP_VERSION);
    assert_eq!(reply["result"]["serverInfo"]["name"], "postkb");
    assert!(reply["result"]["capabilities"]["tools"].is_object());
    assert_eq!(
        fixture.server.connection_state().await,
        ConnectionState::Initializing
    );

    let notification = send(
        &fixture.server,
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert!(notification.is_none());
    assert_eq!(
        fixture.server.connection_state().await,
        ConnectionState::Ready
    );

    Ok(())
}

#[tokio::test]
async fn initialize_rejects_unknown_versions() -> Result<()> {
    let fixture = fixture().await?;

    let reply = send(
        &fixture.server,
        json!({
            "jsonrpc": "2.0",
            "id": "init",
            "method": "initialize",
            "params": {
                "protocolVersion": "1999-01-01",
                "clientInfo": { "name": "old", "version": "0.1" }
            }
        }),
    )
    .await
    .expect("initialize is answered");

    assert_eq!(reply["id"], "init");
    assert_eq!(
        reply["error"]["code"],
        mcp_error_codes::INVALID_PROTOCOL_VERSION
    );

    Ok(())
}

#[tokio::test]
async fn malformed_messages_get_jsonrpc_errors() -> Result<()> {
    let fixture = fixture().await?;

    let reply = fixture
        .server
        .handle_line("{not json")
        .await
        .expect("parse errors are answered");
    let reply = serde_json::to_value(reply)?;
    assert_eq!(reply["error"]["code"], error_codes::PARSE_ERROR);
    assert!(reply["id"].is_null());

    let reply = send(
        &fixture.server,
        json!({ "jsonrpc": "1.0", "id": 1, "method": "ping" }),
    )
    .await
    .expect("bad envelopes are answered");
    assert_eq!(reply["error"]["code"], error_codes::INVALID_REQUEST);

    assert!(fixture.server.handle_line("   ").await.is_none());

    Ok(())
}

#[tokio::test]
async fn ping_and_unknown_methods() -> Result<()> {
    let fixture = fixture().await?;

    let reply = send(
        &fixture.server,
        json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }),
    )
    .await
    .expect("ping is answered");
    assert_eq!(reply["result"], json!({}));

    let reply = send(
        &fixture.server,
        json!({ "jsonrpc": "2.0", "id": 3, "method": "resources/list" }),
    )
    .await
    .expect("unknown methods are answered");
    assert_eq!(reply["error"]["code"], error_codes::METHOD_NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn tools_are_listed_by_name() -> Result<()> {
    let fixture = fixture().await?;

    let reply = send(
        &fixture.server,
        json!({ "jsonrpc": "2.0", "id": 4, "method": "tools/list" }),
    )
    .await
    .expect("tools/list is answered");

    let names: Vec<&str> = reply["result"]["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert_eq!(names, vec![ADD_POST_TOOL, SEARCH_TOOL]);

    let search = &reply["result"]["tools"][1];
    assert_eq!(search["inputSchema"]["required"], json!(["query"]));

    Ok(())
}

#[tokio::test]
async fn unknown_tool_is_a_protocol_error() -> Result<()> {
    let fixture = fixture().await?;

    let reply = call_tool(&fixture.server, "list_sites", json!({})).await;
    assert_eq!(reply["error"]["code"], mcp_error_codes::TOOL_NOT_FOUND);

    let reply = send(
        &fixture.server,
        json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/call" }),
    )
    .await
    .expect("tools/call is answered");
    assert_eq!(reply["error"]["code"], error_codes::INVALID_PARAMS);

    Ok(())
}

#[tokio::test]
async fn search_tool_returns_the_response_body() -> Result<()> {
    let fixture = fixture().await?;

    let reply = call_tool(
        &fixture.server,
        SEARCH_TOOL,
        json!({ "query": "python", "top_k": 1 }),
    )
    .await;
    assert!(!is_error(&reply));

    let body: Value = serde_json::from_str(tool_text(&reply))?;
    assert_eq!(body["status"], "found");
    assert_eq!(body["query"], "python");
    assert_eq!(body["results_count"], 1);
    assert_eq!(body["results"][0]["post_id"], "py");
    assert_eq!(body["results"][0]["title"], "Virtualenv basics");
    assert!(
        body["results"][0]["reason"]
            .as_str()
            .expect("reason is text")
            .ends_with("; Tags: Python")
    );

    Ok(())
}

#[tokio::test]
async fn search_tool_uses_the_default_top_k() -> Result<()> {
    let fixture = fixture().await?;

    let reply = call_tool(&fixture.server, SEARCH_TOOL, json!({ "query": "anything" })).await;
    let body: Value = serde_json::from_str(tool_text(&reply))?;
    assert_eq!(body["results_count"], 2);

    Ok(())
}

#[tokio::test]
async fn search_tool_reports_bad_arguments_in_band() -> Result<()> {
    let fixture = fixture().await?;

    for arguments in [
        json!({}),
        json!({ "query": "   " }),
        json!({ "query": "python", "top_k": 0 }),
        json!({ "query": "python", "top_k": 21 }),
        json!({ "query": "python", "top_k": -1 }),
    ] {
        let reply = call_tool(&fixture.server, SEARCH_TOOL, arguments.clone()).await;
        assert!(is_error(&reply), "expected an error result for {arguments}");
    }

    Ok(())
}

#[tokio::test]
async fn add_post_tool_persists_and_indexes() -> Result<()> {
    let fixture = fixture().await?;

    let reply = call_tool(
        &fixture.server,
        ADD_POST_TOOL,
        json!({
            "title": "Raised beds",
            "content": "garden soil and compost",
            "tags": ["Garden", " "],
            "post_id": "beds"
        }),
    )
    .await;
    assert!(!is_error(&reply));

    let body: Value = serde_json::from_str(tool_text(&reply))?;
    assert_eq!(
        body,
        json!({
            "status": "success",
            "message": "Post added successfully",
            "post_id": "beds",
            "title": "Raised beds"
        })
    );

    let stored = fixture
        .database
        .get_post("beds")
        .await?
        .expect("post should be stored");
    assert_eq!(stored.tags, vec!["Garden".to_string()]);

    let reply = call_tool(
        &fixture.server,
        SEARCH_TOOL,
        json!({ "query": "garden", "top_k": 1 }),
    )
    .await;
    let search: Value = serde_json::from_str(tool_text(&reply))?;
    assert_eq!(search["results"][0]["post_id"], "beds");

    Ok(())
}

#[tokio::test]
async fn add_post_tool_generates_ids_and_accepts_joined_tags() -> Result<()> {
    let fixture = fixture().await?;

    let reply = call_tool(
        &fixture.server,
        ADD_POST_TOOL,
        json!({ "title": "Crates", "content": "rust packages", "tags": "Rust, Cargo" }),
    )
    .await;
    let body: Value = serde_json::from_str(tool_text(&reply))?;
    let post_id = body["post_id"].as_str().expect("id is text");
    assert!(uuid::Uuid::parse_str(post_id).is_ok());

    let stored = fixture
        .database
        .get_post(post_id)
        .await?
        .expect("post should be stored");
    assert_eq!(stored.tags, vec!["Rust".to_string(), "Cargo".to_string()]);

    Ok(())
}

#[tokio::test]
async fn add_post_tool_overwrites_an_existing_id() -> Result<()> {
    let fixture = fixture().await?;

    let reply = call_tool(
        &fixture.server,
        ADD_POST_TOOL,
        json!({
            "title": "Vegetable garden",
            "content": "garden planting calendar",
            "tags": ["Garden"],
            "post_id": "py"
        }),
    )
    .await;
    assert!(!is_error(&reply), "overwrite failed: {reply}");
    let body: Value = serde_json::from_str(tool_text(&reply))?;
    assert_eq!(body["post_id"], "py");

    let stored = fixture
        .database
        .get_post("py")
        .await?
        .expect("post should be stored");
    assert_eq!(stored.title, "Vegetable garden");
    assert_eq!(stored.tags, vec!["Garden".to_string()]);
    assert_eq!(fixture.database.post_counts().await?.total, 2);

    let reply = call_tool(
        &fixture.server,
        SEARCH_TOOL,
        json!({ "query": "garden", "top_k": 5 }),
    )
    .await;
    let search: Value = serde_json::from_str(tool_text(&reply))?;
    let results = search["results"].as_array().expect("results array");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["post_id"], "py");
    assert_eq!(results[0]["matched_content"], "garden planting calendar");

    Ok(())
}

#[tokio::test]
async fn add_post_tool_rejects_invalid_posts() -> Result<()> {
    let fixture = fixture().await?;

    let reply = call_tool(&fixture.server, ADD_POST_TOOL, json!({ "title": "No body" })).await;
    assert!(is_error(&reply));

    let reply = call_tool(
        &fixture.server,
        ADD_POST_TOOL,
        json!({ "title": "  ", "content": "text" }),
    )
    .await;
    assert!(is_error(&reply));
    assert!(tool_text(&reply).starts_with("Failed to add post"));

    Ok(())
}

#[tokio::test]
async fn serve_answers_line_by_line() -> Result<()> {
    let fixture = fixture().await?;
    let (client, server_side) = tokio::io::duplex(64 * 1024);
    let (server_reader, server_writer) = tokio::io::split(server_side);

    let serving = tokio::spawn(Arc::clone(&fixture.server).serve(server_reader, server_writer));

    let (client_reader, mut client_writer) = tokio::io::split(client);
    client_writer
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
        .await?;
    client_writer
        .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
        .await?;
    client_writer
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n")
        .await?;
    client_writer.shutdown().await?;
    drop(client_writer);

    let mut lines = BufReader::new(client_reader).lines();
    let first: Value = serde_json::from_str(&lines.next_line().await?.expect("ping reply"))?;
    let second: Value = serde_json::from_str(&lines.next_line().await?.expect("list reply"))?;
    assert_eq!(first["id"], 1);
    assert_eq!(second["id"], 2);
    assert!(lines.next_line().await?.is_none());

    serving.await??;
    assert_eq!(
        fixture.server.connection_state().await,
        ConnectionState::Closed
    );

    Ok(())
}
