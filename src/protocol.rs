use bytes::Bytes;
use serde::{Deserialize, Serialize};

// 设备发来的信令消息（hello / listen 等）
#[derive(Deserialize, Debug, Clone)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub state: Option<String>,
    pub mode: Option<String>,
    pub session_id: Option<String>,
}

// 音频参数结构体，握手时下发给设备
#[derive(Serialize, Debug)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub frame_duration: u32,
}

// Hello 应答，设备据此配置自己的编解码器
#[derive(Serialize, Debug)]
pub struct HelloResponse {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub transport: String,
    pub audio_params: AudioParams,
}

impl HelloResponse {
    pub fn websocket() -> Self {
        Self {
            msg_type: "hello".to_string(),
            transport: "websocket".to_string(),
            audio_params: AudioParams {
                format: "opus".to_string(),
                sample_rate: crate::audio::SAMPLE_RATE,
                channels: crate::audio::codec::CHANNELS,
                frame_duration: crate::audio::FRAME_DURATION_MS,
            },
        }
    }
}

// 进度通知，纯提示性质，发送失败直接忽略
#[derive(Serialize, Debug)]
pub struct StateNotice {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub state: String,
    pub text: String,
}

impl StateNotice {
    pub fn processing(text: impl Into<String>) -> Self {
        Self {
            msg_type: "state".to_string(),
            state: "processing".to_string(),
            text: text.into(),
        }
    }
}

// TTS 播放控制，包裹一段回复音频帧序列
#[derive(Serialize, Debug)]
pub struct TtsControl {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub state: String,
}

impl TtsControl {
    pub fn start() -> Self {
        Self {
            msg_type: "tts".to_string(),
            state: "start".to_string(),
        }
    }

    pub fn stop() -> Self {
        Self {
            msg_type: "tts".to_string(),
            state: "stop".to_string(),
        }
    }
}

// 发往设备的消息，由连接的 writer 任务统一消费
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
}

impl Outbound {
    pub fn json<T: Serialize>(msg: &T) -> anyhow::Result<Self> {
        Ok(Outbound::Text(serde_json::to_string(msg)?))
    }
}
