mod audio;
mod config;
mod engines;
mod pacer;
mod pipeline;
mod protocol;
mod server;
mod session;
mod weblog;

use std::sync::Arc;

use config::{Config, ConfigStore, CONFIG_FILE};
use engines::Engines;
use server::AppState;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use weblog::{WebLog, WebLogLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志：控制台输出 + 配置面板的滚动日志环
    let weblog = WebLog::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(WebLogLayer::new(weblog.clone()))
        .init();

    // 加载配置：默认值 < config.toml < 环境变量
    let cfg = Config::load()?;
    let listen_addr = cfg.listen_addr.clone();
    let config_store = Arc::new(ConfigStore::new(cfg, CONFIG_FILE));

    // 编解码器自检。失败只告警一次，之后所有会话降级为透传模式
    if !audio::codec::codec_available() {
        tracing::warn!("Opus codec unavailable, sessions degrade to raw passthrough audio");
    }

    // ffmpeg 自检，缺了它合成音频无法转成 PCM
    if !engines::tts::ffmpeg_available().await {
        tracing::warn!("ffmpeg not found in PATH, speech synthesis will fail");
    }

    let state = AppState {
        config: config_store,
        engines: Arc::new(Engines::groq_and_edge()),
        weblog,
    };

    let router = server::create_router(state);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!("Gateway listening on {}", listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

// 监听 Ctrl+C 信号
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl+C, shutting down...");
}
