#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Knowledge base driven through the HTTP embedding providers

mod common;

use anyhow::Result;
use postkb::KbError;
use postkb::config::{Config, ProviderKind};
use postkb::embeddings::create_provider;
use postkb::kb::{KbSettings, KnowledgeBase};
use postkb::retrieval::SearchRequest;
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use common::{StemEmbedder, seed, temp_database};

/// Embeds every input of an Ollama `/api/embed` request
struct OllamaEmbed;

impl Respond for OllamaEmbed {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400);
        };
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|text| StemEmbedder::vector(text).ok())
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

/// Embeds every input of an OpenAI `/embeddings` request, in reverse order
struct OpenAiEmbed;

impl Respond for OpenAiEmbed {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400);
        };
        let mut data: Vec<Value> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .enumerate()
                    .filter_map(|(index, text)| {
                        let vector = StemEmbedder::vector(text.as_str()?).ok()?;
                        Some(json!({ "object": "embedding", "index": index, "embedding": vector }))
                    })
                    .collect()
            })
            .unwrap_or_default();
        data.reverse();
        ResponseTemplate::new(200).set_body_json(json!({ "object": "list", "data": data }))
    }
}

fn ollama_config(server: &MockServer, base_dir: &std::path::Path) -> Result<Config> {
    let url = Url::parse(&server.uri())?;
    let mut config = Config {
        base_dir: base_dir.to_path_buf(),
        ..Config::default()
    };
    config.embedding.provider = ProviderKind::Ollama;
    config.embedding.batch_size = 2;
    config.embedding.ollama.protocol = url.scheme().to_string();
    config.embedding.ollama.host = url.host_str().unwrap_or("127.0.0.1").to_string();
    config.embedding.ollama.port = url.port().unwrap_or(80);
    Ok(config)
}

#[tokio::test]
async fn ollama_backed_knowledge_base_answers_queries() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "nomic-embed-text:latest" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(OllamaEmbed)
        .mount(&server)
        .await;

    let (temp_dir, database) = temp_database().await?;
    seed(&database).await?;
    let config = ollama_config(&server, temp_dir.path())?;

    let provider = create_provider(&config, None)?;
    assert_eq!(provider.name(), "ollama/nomic-embed-text:latest");

    let kb = KnowledgeBase::new(
        Arc::new(database),
        provider,
        KbSettings::from_config(&config),
    );
    kb.initialize().await?;

    let response = kb
        .search_request(&SearchRequest::new("python dependency isolation", 1))
        .await?;
    assert_eq!(response.results[0].post_id, "post_001");

    Ok(())
}

#[tokio::test]
async fn unreachable_model_is_a_configuration_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    let (temp_dir, database) = temp_database().await?;
    let config = ollama_config(&server, temp_dir.path())?;
    let kb = KnowledgeBase::new(
        Arc::new(database),
        create_provider(&config, None)?,
        KbSettings::from_config(&config),
    );

    let error = kb.initialize().await.expect_err("missing model must fail");
    assert!(matches!(error, KbError::Config(_)));
    assert!(!kb.is_ready().await);

    Ok(())
}

#[tokio::test]
async fn openai_backed_knowledge_base_answers_queries() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer sk-test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test-key"))
        .respond_with(OpenAiEmbed)
        .mount(&server)
        .await;

    let (temp_dir, database) = temp_database().await?;
    seed(&database).await?;

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.embedding.openai.base_url = format!("{}/v1", server.uri());

    let provider = create_provider(&config, Some("sk-test-key".to_string()))?;
    assert_eq!(provider.name(), "openai/text-embedding-3-small");

    let kb = KnowledgeBase::new(
        Arc::new(database),
        provider,
        KbSettings::from_config(&config),
    );
    kb.initialize().await?;

    let results = kb.search("fastapi routes", 1).await?;
    assert_eq!(results[0].post_id, "post_002");

    Ok(())
}

#[tokio::test]
async fn openai_requires_a_key() -> Result<()> {
    let config = Config::default();
    assert!(matches!(
        create_provider(&config, None),
        Err(KbError::Config(_))
    ));
    assert!(matches!(
        create_provider(&config, Some("   ".to_string())),
        Err(KbError::Config(_))
    ));

    Ok(())
}
