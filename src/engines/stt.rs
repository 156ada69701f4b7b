use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::Transcriber;
use crate::config::Config;

const TRANSCRIPTION_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
const STT_MODEL: &str = "whisper-large-v3-turbo";
// 语言提示，引导 Whisper 输出中文
const LANGUAGE: &str = "zh";
const STT_PROMPT: &str = "请用中文回答。";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct GroqTranscriber {
    client: reqwest::Client,
}

impl GroqTranscriber {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transcriber for GroqTranscriber {
    async fn transcribe(&self, wav: Vec<u8>, cfg: &Config) -> Result<String> {
        anyhow::ensure!(!cfg.groq_api_key.is_empty(), "Groq API key not configured");

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("input.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", STT_MODEL)
            .text("language", LANGUAGE)
            .text("prompt", STT_PROMPT);

        let response = self
            .client
            .post(TRANSCRIPTION_URL)
            .bearer_auth(&cfg.groq_api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        anyhow::ensure!(
            response.status().is_success(),
            "transcription HTTP error: {}",
            response.status()
        );

        let body: TranscriptionResponse =
            response.json().await.context("parse transcription response")?;
        Ok(body.text)
    }
}
