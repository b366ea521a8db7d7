#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! A full MCP session over an in-memory stdio pair

mod common;

use anyhow::Result;
use postkb::config::SyncPolicy;
use postkb::kb::sync::PostSync;
use postkb::mcp::protocol::MCP_VERSION;
use postkb::mcp::server::ConnectionState;
use postkb::mcp::{McpServer, register_knowledge_base_tools};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use common::seeded_knowledge_base;

struct Client {
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
}

impl Client {
    async fn send(&mut self, message: Value) -> Result<()> {
        let mut line = message.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn request(&mut self, message: Value) -> Result<Value> {
        self.send(message).await?;
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("server closed the stream"))?;
        Ok(serde_json::from_str(&line)?)
    }

    async fn call(&mut self, id: i64, name: &str, arguments: Value) -> Result<Value> {
        let reply = self
            .request(json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": name, "arguments": arguments }
            }))
            .await?;
        assert_eq!(reply["id"], id);
        assert_eq!(reply["result"]["isError"], false, "unexpected failure: {reply}");

        let text = reply["result"]["content"][0]["text"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("tool result has no text"))?;
        Ok(serde_json::from_str(text)?)
    }
}

#[tokio::test]
async fn stdio_session_searches_and_adds_posts() -> Result<()> {
    let (_temp_dir, database, _embedder, kb) =
        seeded_knowledge_base(SyncPolicy::FullRebuild).await?;
    kb.initialize().await?;

    let server = McpServer::new("postkb".to_string(), "0.0.0-test".to_string());
    register_knowledge_base_tools(&server, PostSync::new(database, Arc::clone(&kb)), 3).await;
    let server = Arc::new(server);

    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let (server_reader, server_writer) = tokio::io::split(server_side);
    let serving = tokio::spawn(Arc::clone(&server).serve(server_reader, server_writer));

    let (client_reader, client_writer) = tokio::io::split(client_side);
    let mut client = Client {
        writer: client_writer,
        lines: BufReader::new(client_reader).lines(),
    };

    let init = client
        .request(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "integration", "version": "1" }
            }
        }))
        .await?;
    assert_eq!(init["result"]["serverInfo"]["version"], "0.0.0-test");

    client
        .send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await?;

    let tools = client
        .request(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .await?;
    assert_eq!(tools["result"]["tools"].as_array().map(Vec::len), Some(2));
    assert_eq!(server.connection_state().await, ConnectionState::Ready);

    let found = client
        .call(
            3,
            "search_knowledge_base",
            json!({ "query": "python dependency isolation", "top_k": 1 }),
        )
        .await?;
    assert_eq!(found["status"], "found");
    assert_eq!(found["results"][0]["post_id"], "post_001");
    assert_eq!(
        found["results"][0]["title"],
        "Python Virtual Environment Guide"
    );

    let added = client
        .call(
            4,
            "add_post_to_knowledge_base",
            json!({
                "title": "Rust Ownership Primer",
                "content": "Rust ownership rules: each value has one owner and borrows never outlive it.",
                "tags": ["Rust"],
                "post_id": "post_004"
            }),
        )
        .await?;
    assert_eq!(added["status"], "success");
    assert_eq!(added["post_id"], "post_004");

    let found = client
        .call(
            5,
            "search_knowledge_base",
            json!({ "query": "rust ownership borrows", "top_k": 1 }),
        )
        .await?;
    assert_eq!(found["results"][0]["post_id"], "post_004");
    assert_eq!(found["results"][0]["reason"].as_str().map(|r| r.ends_with("; Tags: Rust")), Some(true));

    client.writer.shutdown().await?;
    drop(client);
    serving.await??;
    assert_eq!(server.connection_state().await, ConnectionState::Closed);

    Ok(())
}
