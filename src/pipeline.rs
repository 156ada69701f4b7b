use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::{gain, FrameEncoder, SAMPLE_RATE};
use crate::config::Config;
use crate::engines::Engines;
use crate::pacer;
use crate::protocol::{Outbound, StateNotice};
use crate::session::Utterance;

// 低于这个字节数的录音当作无意义噪声，整条交互直接放弃
const MIN_UTTERANCE_BYTES: usize = 4000;
// 回复文本的预览长度（字符数）
const REPLY_PREVIEW_CHARS: usize = 20;

/// 一次完整交互：增益 → STT → LLM → TTS → 按实时节奏回送。
/// 尽力而为：任何一级失败都只记日志并放弃本次交互，会话照常可用。
pub async fn run_interaction(
    utterance: Utterance,
    cfg: Arc<Config>,
    engines: Arc<Engines>,
    tx: mpsc::Sender<Outbound>,
) {
    let byte_len = utterance.byte_len();
    let mut samples = utterance.samples;

    // 1. 麦克风增益，改善 STT 识别率
    if cfg.mic_gain != 1.0 {
        gain::apply_gain(&mut samples, cfg.mic_gain);
        tracing::info!("Applied mic gain x{}", cfg.mic_gain);
    }

    tracing::info!("Processing utterance ({} bytes)", byte_len);
    if byte_len < MIN_UTTERANCE_BYTES {
        return;
    }

    // 2. STT
    notify(&tx, "识别中...").await;
    let wav = match encode_wav(&samples) {
        Ok(wav) => wav,
        Err(e) => {
            tracing::warn!("WAV encode failed: {}", e);
            return;
        }
    };
    let transcript = match engines.stt.transcribe(wav, &cfg).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Transcription failed: {}", e);
            return;
        }
    };
    tracing::info!("User said: {}", transcript);
    notify(&tx, &transcript).await;

    // 3. LLM
    let reply = match engines.llm.complete(&transcript, &cfg).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Completion failed: {}", e);
            return;
        }
    };
    tracing::info!("Assistant reply: {}", reply);
    notify(&tx, &preview(&reply)).await;

    // 4. TTS，随后按帧节奏回送
    tracing::info!("Synthesizing voice ({})", cfg.voice);
    let pcm = match engines.tts.synthesize(&reply, &cfg).await {
        Ok(pcm) => pcm,
        Err(e) => {
            tracing::warn!("Synthesis failed: {}", e);
            return;
        }
    };

    tracing::info!("Sending reply audio ({} samples)", pcm.len());
    let mut encoder = FrameEncoder::new();
    if let Err(e) = pacer::stream_reply(&pcm, &mut encoder, &tx).await {
        tracing::warn!("Reply stream aborted: {}", e);
    }
}

// 提示性状态通知：尽力而为，发送失败一律吞掉
async fn notify(tx: &mpsc::Sender<Outbound>, text: &str) {
    if let Ok(msg) = Outbound::json(&StateNotice::processing(text)) {
        let _ = tx.send(msg).await;
    }
}

fn preview(reply: &str) -> String {
    let head: String = reply.chars().take(REPLY_PREVIEW_CHARS).collect();
    if reply.chars().count() > REPLY_PREVIEW_CHARS {
        format!("{}..", head)
    } else {
        head
    }
}

// 话音包装成单声道 16bit WAV 容器，作为转写请求的文件体
fn encode_wav(samples: &[i16]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("create WAV writer")?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize().context("finalize WAV")?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{ChatModel, Synthesizer, Transcriber};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeStt {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeStt {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Transcriber for FakeStt {
        async fn transcribe(&self, _wav: Vec<u8>, _cfg: &Config) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("transcription unavailable");
            }
            Ok("今天天气怎么样".to_string())
        }
    }

    struct FakeLlm {
        calls: AtomicUsize,
    }

    impl FakeLlm {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatModel for FakeLlm {
        async fn complete(&self, _user_text: &str, _cfg: &Config) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("今天晴，适合出门。".to_string())
        }
    }

    struct FakeTts {
        calls: AtomicUsize,
    }

    impl FakeTts {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Synthesizer for FakeTts {
        async fn synthesize(&self, _text: &str, _cfg: &Config) -> Result<Vec<i16>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![100i16; 1400])
        }
    }

    fn fake_engines(stt: Arc<FakeStt>, llm: Arc<FakeLlm>, tts: Arc<FakeTts>) -> Arc<Engines> {
        Arc::new(Engines { stt, llm, tts })
    }

    fn utterance(samples: usize) -> Utterance {
        Utterance {
            samples: vec![500i16; samples],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn short_utterance_never_reaches_transcription() {
        let (tx, _rx) = mpsc::channel(64);
        let stt = FakeStt::new(false);
        let engines = fake_engines(stt.clone(), FakeLlm::new(), FakeTts::new());

        // 1000 样本 = 2000 字节，低于门限
        run_interaction(utterance(1000), Arc::new(Config::default()), engines, tx).await;
        assert_eq!(stt.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transcription_failure_abandons_pipeline() {
        let (tx, _rx) = mpsc::channel(64);
        let stt = FakeStt::new(true);
        let llm = FakeLlm::new();
        let engines = fake_engines(stt.clone(), llm.clone(), FakeTts::new());

        run_interaction(utterance(8000), Arc::new(Config::default()), engines, tx).await;
        assert_eq!(stt.calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_interaction_streams_bracketed_reply() {
        let (tx, mut rx) = mpsc::channel(64);
        let stt = FakeStt::new(false);
        let llm = FakeLlm::new();
        let tts = FakeTts::new();
        let engines = fake_engines(stt.clone(), llm.clone(), tts.clone());

        run_interaction(utterance(8000), Arc::new(Config::default()), engines, tx).await;
        assert_eq!(stt.calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tts.calls.load(Ordering::SeqCst), 1);

        let mut texts = Vec::new();
        let mut frames = 0usize;
        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Text(text) => texts.push(text),
                Outbound::Binary(_) => frames += 1,
            }
        }
        // 1400 样本 → 2 帧
        assert_eq!(frames, 2);
        assert!(texts.iter().any(|t| t.contains("今天天气怎么样")));
        let start_idx = texts.iter().position(|t| t.contains(r#""type":"tts""#)).unwrap();
        assert!(texts[start_idx].contains(r#""state":"start""#));
        assert!(texts.last().unwrap().contains(r#""state":"stop""#));
    }

    #[test]
    fn gain_is_applied_before_transcription() {
        // 直接验证增益函数在流水线入口的行为
        let mut samples = vec![100i16, -100];
        gain::apply_gain(&mut samples, 2.0);
        assert_eq!(samples, vec![200, -200]);
    }

    #[test]
    fn preview_truncates_long_replies() {
        let long = "零一二三四五六七八九零一二三四五六七八九多余";
        assert_eq!(preview(long), "零一二三四五六七八九零一二三四五六七八九..");
        assert_eq!(preview("短"), "短");
    }

    #[test]
    fn wav_container_has_expected_size() {
        let wav = encode_wav(&vec![0i16; 1000]).unwrap();
        // 44 字节标准头 + 2000 字节数据
        assert_eq!(wav.len(), 44 + 2000);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}
