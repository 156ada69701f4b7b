//! Edge TTS synthesis client.
//!
//! Speaks the readaloud WebSocket protocol: one speech.config message, then
//! one SSML request. Audio arrives as binary frames (2-byte big-endian
//! header length, ASCII headers, payload) until a turn.end text message.
//! The collected MP3 stream is converted to session-rate PCM by an external
//! ffmpeg process; that dependency is probed once at startup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;
use uuid::Uuid;

use super::Synthesizer;
use crate::audio::SAMPLE_RATE;
use crate::config::Config;

const EDGE_TTS_URL: &str = "wss://speech.platform.bing.com/consumer/speech/synthesize/readaloud/edge/v1?TrustedClientToken=6A5AA1D4EAFF4E9FB37E23D68491D6F4";
const EDGE_ORIGIN: &str = "chrome-extension://jdiccldimpdaibmpdkjnbmckianbfold";
const EDGE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0";
const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

pub struct EdgeSynthesizer;

impl EdgeSynthesizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EdgeSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// ffmpeg 可用性检查，启动时调用一次并告警
pub async fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[async_trait]
impl Synthesizer for EdgeSynthesizer {
    async fn synthesize(&self, text: &str, cfg: &Config) -> Result<Vec<i16>> {
        let mp3 = fetch_mp3(text, &cfg.voice, &cfg.tts_rate).await?;
        anyhow::ensure!(!mp3.is_empty(), "synthesis produced no audio");
        mp3_to_pcm(mp3).await
    }
}

async fn fetch_mp3(text: &str, voice: &str, rate: &str) -> Result<Vec<u8>> {
    let connection_id = Uuid::new_v4().simple().to_string();
    let ws_url = format!("{}&ConnectionId={}", EDGE_TTS_URL, connection_id);

    let url = Url::parse(&ws_url)?;
    let host = url.host_str().context("synthesis endpoint has no host")?;

    // 服务端校验 Origin 和 UA，必须手工构造请求
    let request = tokio_tungstenite::tungstenite::http::Request::builder()
        .method("GET")
        .uri(ws_url.as_str())
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .header("Origin", EDGE_ORIGIN)
        .header("User-Agent", EDGE_USER_AGENT)
        .body(())?;

    let (ws_stream, _) = connect_async(request)
        .await
        .context("connect to synthesis endpoint")?;
    let (mut write, mut read) = ws_stream.split();

    let timestamp = chrono::Utc::now()
        .format("%a %b %d %Y %H:%M:%S GMT+0000 (Coordinated Universal Time)")
        .to_string();

    let speech_config = format!(
        "X-Timestamp:{timestamp}\r\nContent-Type:application/json; charset=utf-8\r\nPath:speech.config\r\n\r\n{{\"context\":{{\"synthesis\":{{\"audio\":{{\"metadataoptions\":{{\"sentenceBoundaryEnabled\":\"false\",\"wordBoundaryEnabled\":\"false\"}},\"outputFormat\":\"{OUTPUT_FORMAT}\"}}}}}}}}"
    );
    write.send(Message::Text(speech_config.into())).await?;

    let request_id = Uuid::new_v4().simple().to_string();
    let ssml = format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='zh-CN'><voice name='{}'><prosody pitch='+0Hz' rate='{}' volume='+0%'>{}</prosody></voice></speak>",
        voice,
        rate,
        escape_xml(text)
    );
    let ssml_message = format!(
        "X-RequestId:{request_id}\r\nContent-Type:application/ssml+xml\r\nX-Timestamp:{timestamp}\r\nPath:ssml\r\n\r\n{ssml}"
    );
    write.send(Message::Text(ssml_message.into())).await?;

    let mut mp3 = Vec::new();
    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                if text.contains("Path:turn.end") {
                    break;
                }
            }
            Message::Binary(data) => {
                if let Some(payload) = audio_payload(&data) {
                    mp3.extend_from_slice(payload);
                }
            }
            Message::Close(frame) => {
                tracing::debug!("synthesis stream closed early: {:?}", frame);
                break;
            }
            _ => {}
        }
    }
    Ok(mp3)
}

/// Extract the audio payload from one binary readaloud frame, if it carries
/// a `Path:audio` header.
fn audio_payload(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 2 {
        return None;
    }
    let header_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let payload_start = 2 + header_len;
    if payload_start > data.len() {
        return None;
    }
    let header = String::from_utf8_lossy(&data[2..payload_start]);
    if header.contains("Path:audio") {
        Some(&data[payload_start..])
    } else {
        None
    }
}

async fn mp3_to_pcm(mp3: Vec<u8>) -> Result<Vec<i16>> {
    let rate = SAMPLE_RATE.to_string();
    let mut child = Command::new("ffmpeg")
        .args([
            "-y", "-i", "pipe:0", "-f", "s16le", "-acodec", "pcm_s16le", "-ar",
            rate.as_str(), "-ac", "1", "pipe:1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn ffmpeg")?;

    let mut stdin = child.stdin.take().context("ffmpeg stdin unavailable")?;
    // 单独任务喂数据，写完即关闭管道，否则 ffmpeg 不会退出
    let feeder = tokio::spawn(async move {
        let _ = stdin.write_all(&mp3).await;
    });

    let output = child.wait_with_output().await.context("wait for ffmpeg")?;
    let _ = feeder.await;
    anyhow::ensure!(output.status.success(), "ffmpeg exited with {}", output.status);

    Ok(output
        .stdout
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}
