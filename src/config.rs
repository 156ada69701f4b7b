use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

// 配置文件名，保存时写回同一个文件
pub const CONFIG_FILE: &str = "config.toml";

// 可选的 LLM 模型，配置面板下拉框用
pub const GROQ_MODELS: &[&str] = &[
    "openai/gpt-oss-120b",
    "llama-3.3-70b-versatile",
    "llama-3.1-8b-instant",
    "gemma2-9b-it",
];

// 可选的 TTS 音色（Edge TTS 音色 ID + 面板显示名）
pub const VOICE_OPTIONS: &[(&str, &str)] = &[
    ("zh-CN-XiaoxiaoNeural", "晓晓（女声 - 普通话）"),
    ("zh-CN-YunxiNeural", "云希（男声 - 普通话）"),
    ("zh-CN-YunyangNeural", "云扬（男声 - 新闻播报）"),
    ("zh-TW-HsiaoChenNeural", "曉臻（女声 - 台湾）"),
    ("en-US-ChristopherNeural", "Christopher（男声 - 英语）"),
    ("en-US-AriaNeural", "Aria（女声 - 英语）"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 服务监听地址，修改后需要重启生效
    pub listen_addr: String,

    // 外部服务凭据与选型
    pub groq_api_key: String,
    pub system_prompt: String,
    pub model: String,
    pub voice: String,
    pub tts_rate: String,
    pub llm_temperature: f32,

    // 录音端点检测参数
    pub mic_gain: f32,
    pub silence_threshold: u32,
    pub silence_duration: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            groq_api_key: String::new(),
            system_prompt: "你是小智，一个简洁有用的语音助手。".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            voice: "zh-CN-XiaoxiaoNeural".to_string(),
            tts_rate: "+0%".to_string(),
            llm_temperature: 0.7,
            mic_gain: 1.0,
            silence_threshold: 1000,
            silence_duration: 2.0,
        }
    }
}

impl Config {
    /// 加载顺序：内置默认值 < config.toml < XIAOZHI_* 环境变量
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("XIAOZHI"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            anyhow::bail!("listen_addr cannot be empty");
        }
        if self.silence_duration <= 0.0 {
            anyhow::bail!("silence_duration must be positive");
        }
        if self.mic_gain <= 0.0 {
            anyhow::bail!("mic_gain must be positive");
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            anyhow::bail!("llm_temperature must be within 0.0..=2.0");
        }
        Ok(())
    }
}

/// 全进程共享的配置源。会话每次交互开始时取一份快照，
/// 阻塞的外部调用期间绝不持有锁。
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(cfg: Config, path: impl Into<PathBuf>) -> Self {
        Self {
            current: RwLock::new(Arc::new(cfg)),
            path: path.into(),
        }
    }

    /// 当前配置的一致性快照。
    pub fn snapshot(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 校验、落盘并替换配置。进行中的交互继续使用旧快照。
    pub fn replace(&self, cfg: Config) -> Result<()> {
        cfg.validate()?;
        let text = toml::to_string_pretty(&cfg).context("serialize config")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("write {}", self.path.display()))?;
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Arc::new(cfg);
        Ok(())
    }
}
