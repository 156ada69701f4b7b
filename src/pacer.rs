//! Outbound frame pacer.
//!
//! Turns a finished PCM reply into a timed sequence of wire frames: the
//! waveform is cut into full codec frames (the last one zero-padded), each
//! frame is encoded and sent with a fixed inter-frame delay, and the whole
//! sequence is bracketed by tts start/stop control messages so the device
//! can bound its playback.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::{FrameEncoder, FRAME_SAMPLES};
use crate::protocol::{Outbound, TtsControl};

// 每帧 60ms，发送间隔故意取小一点，避免设备端播放缓冲被抽干
const PACE_INTERVAL: Duration = Duration::from_millis(58);

/// Stream one reply waveform to the device at real-time cadence.
///
/// A failed frame send aborts the remaining loop for this reply only; the
/// caller logs the error and the session keeps running.
pub async fn stream_reply(
    pcm: &[i16],
    encoder: &mut FrameEncoder,
    tx: &mpsc::Sender<Outbound>,
) -> Result<()> {
    tx.send(Outbound::json(&TtsControl::start())?)
        .await
        .context("send reply stream start")?;

    for chunk in pcm.chunks(FRAME_SAMPLES) {
        let packet = if chunk.len() == FRAME_SAMPLES {
            encoder.encode(chunk)
        } else {
            let mut last = chunk.to_vec();
            last.resize(FRAME_SAMPLES, 0);
            encoder.encode(&last)
        }
        .context("encode reply frame")?;

        tx.send(Outbound::Binary(Bytes::from(packet)))
            .await
            .context("send reply frame")?;
        tokio::time::sleep(PACE_INTERVAL).await;
    }

    tx.send(Outbound::json(&TtsControl::stop())?)
        .await
        .context("send reply stream stop")?;
    Ok(())
}
