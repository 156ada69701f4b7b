//! engines - External cognition services consumed by the interaction pipeline
//!
//! Transcription, completion, and synthesis are collaborators, not part of
//! the core: each sits behind a trait so the pipeline can be exercised with
//! in-process fakes. Failures are returned as plain errors; the pipeline
//! decides what is logged and what is abandoned. No retries, no timeouts
//! beyond what the services themselves impose.

pub mod llm;
pub mod stt;
pub mod tts;

use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a complete mono 16-bit WAV container.
    async fn transcribe(&self, wav: Vec<u8>, cfg: &Config) -> Result<String>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce a reply for one user turn under the configured system prompt.
    async fn complete(&self, user_text: &str, cfg: &Config) -> Result<String>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize speech, returning PCM at the session wire profile
    /// (16 kHz, mono, signed 16-bit).
    async fn synthesize(&self, text: &str, cfg: &Config) -> Result<Vec<i16>>;
}

/// The collaborator set shared by every session.
pub struct Engines {
    pub stt: Arc<dyn Transcriber>,
    pub llm: Arc<dyn ChatModel>,
    pub tts: Arc<dyn Synthesizer>,
}

impl Engines {
    /// Production wiring: Groq-hosted Whisper + Groq chat + Edge TTS.
    pub fn groq_and_edge() -> Self {
        let client = reqwest::Client::new();
        Self {
            stt: Arc::new(stt::GroqTranscriber::new(client.clone())),
            llm: Arc::new(llm::GroqChatModel::new(client)),
            tts: Arc::new(tts::EdgeSynthesizer::new()),
        }
    }
}
