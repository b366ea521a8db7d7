//! Post model and the bundled sample posts

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A post as the knowledge base sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

fn default_active() -> bool {
    true
}

impl Post {
    /// Build an active post without timestamps
    #[inline]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            tags,
            active: true,
            created_at: None,
            updated_at: None,
        }
    }

    /// The text that gets embedded for this post
    #[inline]
    pub fn embedding_text(&self) -> String {
        format!("{}. {}", self.title, self.content)
    }
}

/// The sample posts a fresh store is seeded with
#[inline]
pub fn sample_posts() -> Vec<Post> {
    vec![
        Post::new(
            "post_001",
            "Python Virtual Environment Guide",
            "Python virtual environments are essential tools for isolating project dependencies. Use 'python -m venv venv' to create a virtual environment, and 'source venv/bin/activate' to activate it. Virtual environments help avoid dependency conflicts between different projects.",
            vec![
                "Python".to_string(),
                "Virtual Environment".to_string(),
                "Development Tools".to_string(),
            ],
        ),
        Post::new(
            "post_002",
            "FastAPI Quick Start",
            "FastAPI is a modern, fast web framework. It's based on Python type hints and automatically generates API documentation. Use the @app.get() decorator to define routes, and it supports asynchronous request handling.",
            vec![
                "FastAPI".to_string(),
                "Python".to_string(),
                "Web Development".to_string(),
            ],
        ),
        Post::new(
            "post_003",
            "Google ADK Agent Development",
            "Google ADK (Agent Development Kit) is a framework for building AI agents. It supports custom tools, plugins, and multi-agent systems. Use the Agent class to create agents, and run them through the Runner.",
            vec![
                "Google ADK".to_string(),
                "AI".to_string(),
                "Agent Development".to_string(),
            ],
        ),
    ]
}
