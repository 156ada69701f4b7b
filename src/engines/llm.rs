use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::ChatModel;
use crate::config::Config;

const COMPLETION_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatTurn,
}

#[derive(Debug, Deserialize)]
struct ChatTurn {
    content: String,
}

pub struct GroqChatModel {
    client: reqwest::Client,
}

impl GroqChatModel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatModel for GroqChatModel {
    async fn complete(&self, user_text: &str, cfg: &Config) -> Result<String> {
        anyhow::ensure!(!cfg.groq_api_key.is_empty(), "Groq API key not configured");

        // 角色顺序固定：system 在前，user 在后
        let body = json!({
            "model": cfg.model,
            "messages": [
                {"role": "system", "content": cfg.system_prompt},
                {"role": "user", "content": user_text},
            ],
            "temperature": cfg.llm_temperature,
        });

        let response = self
            .client
            .post(COMPLETION_URL)
            .bearer_auth(&cfg.groq_api_key)
            .json(&body)
            .send()
            .await
            .context("completion request failed")?;

        anyhow::ensure!(
            response.status().is_success(),
            "completion HTTP error: {}",
            response.status()
        );

        let body: ChatResponse = response.json().await.context("parse completion response")?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .context("completion response had no choices")
    }
}
