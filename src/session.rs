use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{codec, energy, FrameDecoder};
use crate::config::Config;
use crate::protocol::{Outbound, TtsControl};

// 最短录音时长。开口前的静音不能触发端点检测，否则第一句话会被掐头
const MIN_RECORDING: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Replying,
}

// 一段完整话音的 PCM 快照。交给交互流水线后即归流水线所有
#[derive(Debug)]
pub struct Utterance {
    pub samples: Vec<i16>,
}

impl Utterance {
    pub fn byte_len(&self) -> usize {
        self.samples.len() * 2
    }
}

// 每个连接一个会话。入站帧严格按到达顺序逐个处理，
// 录音与在途交互在任意时刻各至多一个
pub struct Session {
    state: SessionState,
    pcm_buffer: Vec<i16>,
    recording_started_at: Instant,
    last_voice_activity_at: Instant,
    decoder: FrameDecoder,
    silence_threshold: u32,
    silence_duration: Duration,
    tx: mpsc::Sender<Outbound>,
    in_flight: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(decoder: FrameDecoder, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            state: SessionState::Idle,
            pcm_buffer: Vec::new(),
            recording_started_at: now,
            last_voice_activity_at: now,
            decoder,
            silence_threshold: 0,
            silence_duration: MIN_RECORDING,
            tx,
            in_flight: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 上一次交互是否仍在运行。已结束的任务顺手清理掉，
    /// Replying 状态也在这里懒惰地退回 Idle。
    pub fn reply_in_flight(&mut self) -> bool {
        match &self.in_flight {
            Some(handle) if !handle.is_finished() => true,
            Some(_) => {
                self.in_flight = None;
                if self.state == SessionState::Replying {
                    self.state = SessionState::Idle;
                }
                false
            }
            None => {
                if self.state == SessionState::Replying {
                    self.state = SessionState::Idle;
                }
                false
            }
        }
    }

    /// 开始一段新录音。上一条回复还在发送时拒绝，避免同一条通道
    /// 交织两路音频流。
    pub fn start_recording(&mut self, cfg: &Config, now: Instant) -> bool {
        if self.reply_in_flight() {
            tracing::info!("Reply still in flight, ignoring listen request");
            return false;
        }
        self.decoder.reset();
        self.pcm_buffer.clear();
        self.recording_started_at = now;
        self.last_voice_activity_at = now;
        self.silence_threshold = cfg.silence_threshold;
        self.silence_duration = Duration::from_secs_f32(cfg.silence_duration);
        self.state = SessionState::Recording;
        true
    }

    /// 处理一个入站音频帧。录音完成时返回整段话音快照，
    /// 缓冲区随之清空。非录音状态下的音频帧直接忽略。
    pub fn handle_frame(&mut self, data: &[u8], now: Instant) -> Option<Utterance> {
        if self.state != SessionState::Recording {
            return None;
        }

        // 坏帧用整帧静音顶替，保证录音时间轴不跟丢帧节奏
        let pcm = match self.decoder.decode(data) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::debug!("Frame decode failed ({}), substituting silence", e);
                codec::silence_frame()
            }
        };

        let loudness = energy::rms(&pcm);
        self.pcm_buffer.extend_from_slice(&pcm);
        if loudness > self.silence_threshold {
            self.last_voice_activity_at = now;
        }

        let silent_for = now.duration_since(self.last_voice_activity_at);
        let recording_for = now.duration_since(self.recording_started_at);
        if silent_for > self.silence_duration && recording_for > MIN_RECORDING {
            tracing::info!(
                "Silence detected, recording complete ({} samples)",
                self.pcm_buffer.len()
            );
            // 保险起见，先关掉概念上可能还开着的上一条回复流
            if let Ok(msg) = Outbound::json(&TtsControl::stop()) {
                let _ = self.tx.try_send(msg);
            }
            let samples = std::mem::take(&mut self.pcm_buffer);
            self.state = SessionState::Replying;
            return Some(Utterance { samples });
        }
        None
    }

    /// 记下本次话音对应的交互任务，同一时刻至多一个。
    pub fn set_in_flight(&mut self, handle: JoinHandle<()>) {
        self.in_flight = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(silence_duration: f32) -> Config {
        Config {
            silence_threshold: 1000,
            silence_duration,
            ..Default::default()
        }
    }

    fn make_session() -> (Session, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        (Session::new(FrameDecoder::Passthrough, tx), rx)
    }

    fn frame_bytes(value: i16) -> Vec<u8> {
        std::iter::repeat(value)
            .take(960)
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn records_and_endpoints_after_silence() {
        let (mut session, mut rx) = make_session();
        let t0 = Instant::now();
        assert!(session.start_recording(&test_config(2.0), t0));
        assert_eq!(session.state(), SessionState::Recording);

        let loud = frame_bytes(5000);
        let quiet = frame_bytes(0);

        // 1s 处一帧话音，随后全是静音
        assert!(session.handle_frame(&loud, at(t0, 1000)).is_none());
        assert!(session.handle_frame(&quiet, at(t0, 1500)).is_none());
        assert!(session.handle_frame(&quiet, at(t0, 2500)).is_none());
        let utterance = session.handle_frame(&quiet, at(t0, 3100)).unwrap();

        // 话音 = 所有已解码帧按序拼接
        let mut expected = vec![5000i16; 960];
        expected.extend(vec![0i16; 960 * 3]);
        assert_eq!(utterance.samples, expected);
        assert_eq!(session.state(), SessionState::Replying);

        // 端点处发出了防御性的 tts stop
        let msg = rx.try_recv().unwrap();
        match msg {
            Outbound::Text(text) => assert!(text.contains(r#""state":"stop""#)),
            Outbound::Binary(_) => panic!("expected a control message"),
        }

        // 无在途交互时可立即开始新录音，且缓冲区是新的
        assert!(session.start_recording(&test_config(2.0), at(t0, 4000)));
        assert_eq!(session.state(), SessionState::Recording);
        let second = session.handle_frame(&quiet, at(t0, 7000)).unwrap();
        assert_eq!(second.samples.len(), 960);
    }

    #[test]
    fn never_endpoints_before_minimum_duration() {
        let (mut session, _rx) = make_session();
        let t0 = Instant::now();
        // 静音等待 0.5s 就算够，但 2s 的录音下限必须同时满足
        assert!(session.start_recording(&test_config(0.5), t0));

        let quiet = frame_bytes(0);
        for ms in [600, 1000, 1500, 1900, 1999] {
            assert!(
                session.handle_frame(&quiet, at(t0, ms)).is_none(),
                "endpointed prematurely at {}ms",
                ms
            );
        }
        assert!(session.handle_frame(&quiet, at(t0, 2100)).is_some());
    }

    #[test]
    fn voice_activity_defers_endpoint() {
        let (mut session, _rx) = make_session();
        let t0 = Instant::now();
        assert!(session.start_recording(&test_config(2.0), t0));

        let loud = frame_bytes(5000);
        let quiet = frame_bytes(0);
        assert!(session.handle_frame(&loud, at(t0, 2500)).is_none());
        // 距最后话音 1.9s，还不够
        assert!(session.handle_frame(&quiet, at(t0, 4400)).is_none());
        assert!(session.handle_frame(&quiet, at(t0, 4700)).is_some());
    }

    #[test]
    fn decode_error_substitutes_one_silent_frame() {
        let (mut session, _rx) = make_session();
        let t0 = Instant::now();
        assert!(session.start_recording(&test_config(2.0), t0));

        let loud = frame_bytes(5000);
        assert!(session.handle_frame(&loud, at(t0, 500)).is_none());
        // 3 字节的坏帧：解码失败但录音继续
        assert!(session.handle_frame(&[1, 2, 3], at(t0, 560)).is_none());
        let utterance = session.handle_frame(&frame_bytes(0), at(t0, 3000)).unwrap();

        assert_eq!(utterance.samples.len(), 960 * 3);
        assert!(utterance.samples[960..1920].iter().all(|&s| s == 0));
        assert!(utterance.samples[..960].iter().all(|&s| s == 5000));
    }

    #[test]
    fn frames_ignored_while_idle() {
        let (mut session, _rx) = make_session();
        assert!(session
            .handle_frame(&frame_bytes(5000), Instant::now())
            .is_none());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn listen_rejected_while_reply_in_flight() {
        let (tx, _rx) = mpsc::channel(16);
        let mut session = Session::new(FrameDecoder::Passthrough, tx);
        let t0 = Instant::now();
        assert!(session.start_recording(&test_config(2.0), t0));
        assert!(session.handle_frame(&frame_bytes(0), at(t0, 2500)).is_some());

        // 交互还没结束，新的 listen:start 必须被拒绝
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        session.set_in_flight(handle);
        assert!(!session.start_recording(&test_config(2.0), at(t0, 3000)));
        assert_eq!(session.state(), SessionState::Replying);
    }

    #[test]
    fn utterance_byte_len() {
        let utterance = Utterance {
            samples: vec![0i16; 960],
        };
        assert_eq!(utterance.byte_len(), 1920);
    }
}
