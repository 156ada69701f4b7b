use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::audio::FrameDecoder;
use crate::config::{Config, ConfigStore, GROQ_MODELS, VOICE_OPTIONS};
use crate::engines::Engines;
use crate::pipeline;
use crate::protocol::{ClientMessage, HelloResponse, Outbound};
use crate::session::Session;
use crate::weblog::WebLog;

// 单个连接的出站消息队列长度
const OUTBOUND_QUEUE: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub engines: Arc<Engines>,
    pub weblog: WebLog,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(panel))
        .route("/api/config", get(get_config).post(save_config))
        .route("/api/logs", get(get_logs))
        .route("/ws", any(ws_handler))
        .with_state(state)
}

// ======================== 配置面板接口 ========================

async fn panel() -> Html<&'static str> {
    Html(include_str!("../assets/panel.html"))
}

#[derive(Serialize)]
struct VoiceOption {
    id: &'static str,
    name: &'static str,
}

#[derive(Serialize)]
struct ConfigView {
    config: Config,
    models: Vec<&'static str>,
    voices: Vec<VoiceOption>,
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigView> {
    Json(ConfigView {
        config: (*state.config.snapshot()).clone(),
        models: GROQ_MODELS.to_vec(),
        voices: VOICE_OPTIONS
            .iter()
            .map(|&(id, name)| VoiceOption { id, name })
            .collect(),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

async fn save_config(State(state): State<AppState>, Json(cfg): Json<Config>) -> Response {
    match state.config.replace(cfg) {
        Ok(()) => {
            tracing::info!(
                "Configuration saved. Voice: {}",
                state.config.snapshot().voice
            );
            Json(StatusResponse { status: "ok" }).into_response()
        }
        Err(e) => {
            tracing::warn!("Rejected configuration update: {}", e);
            (axum::http::StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

#[derive(Serialize)]
struct LogsResponse {
    logs: Vec<String>,
}

async fn get_logs(State(state): State<AppState>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.weblog.lines(),
    })
}

// ======================== 设备会话通道 ========================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_device_socket(socket, state))
}

// 连接协议处理：同一条通道上复用信令（文本）与音频帧（二进制）。
// 入站帧严格按到达顺序处理；出站全部经由 writer 任务串行发送。
async fn handle_device_socket(socket: WebSocket, state: AppState) {
    tracing::info!("Device connected");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);

    // 写端单独一个任务，信令和音频帧都从这里出去
    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let result = match out {
                Outbound::Text(text) => sender.send(Message::Text(text.into())).await,
                Outbound::Binary(data) => sender.send(Message::Binary(data)).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(FrameDecoder::new(), tx.clone());

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::info!("Device connection error: {}", e);
                break;
            }
        };
        match msg {
            Message::Text(text) => handle_control(text.as_str(), &mut session, &state, &tx).await,
            Message::Binary(data) => {
                if let Some(utterance) = session.handle_frame(&data, Instant::now()) {
                    // 交互异步执行，接收循环立即回去收下一条消息
                    let cfg = state.config.snapshot();
                    let engines = state.engines.clone();
                    let pipeline_tx = tx.clone();
                    let handle =
                        tokio::spawn(pipeline::run_interaction(utterance, cfg, engines, pipeline_tx));
                    session.set_in_flight(handle);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // 连接关闭即丢弃全部会话状态；在途交互不打断，任其自然结束
    tracing::info!("Device disconnected (state: {:?})", session.state());
}

async fn handle_control(
    text: &str,
    session: &mut Session,
    state: &AppState,
    tx: &mpsc::Sender<Outbound>,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(_) => {
            // 可能不是JSON，忽略
            return;
        }
    };

    match msg.msg_type.as_str() {
        "hello" => match Outbound::json(&HelloResponse::websocket()) {
            Ok(reply) => {
                if tx.send(reply).await.is_ok() {
                    tracing::info!("Handshake OK (opus mode)");
                }
            }
            Err(e) => tracing::warn!("Failed to encode hello reply: {}", e),
        },
        "listen" => {
            if msg.state.as_deref() == Some("start") {
                let cfg = state.config.snapshot();
                if session.start_recording(&cfg, Instant::now()) {
                    tracing::info!("Listening...");
                }
            }
        }
        other => {
            tracing::debug!("Unhandled message type: {}", other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_builds_with_state() {
        let state = AppState {
            config: Arc::new(ConfigStore::new(Config::default(), "config.toml")),
            engines: Arc::new(Engines::groq_and_edge()),
            weblog: WebLog::new(),
        };
        let _router = create_router(state);
    }

    #[test]
    fn config_view_serializes_options() {
        let view = ConfigView {
            config: Config::default(),
            models: GROQ_MODELS.to_vec(),
            voices: VOICE_OPTIONS
                .iter()
                .map(|&(id, name)| VoiceOption { id, name })
                .collect(),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert!(json["models"].as_array().unwrap().len() >= 3);
        assert_eq!(json["voices"][0]["id"], "zh-CN-XiaoxiaoNeural");
        assert_eq!(json["config"]["silence_threshold"], 1000);
    }
}
