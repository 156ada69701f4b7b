//! Opus frame decoder/encoder at the gateway's fixed wire profile.
//!
//! - Decoder: one compressed wire frame → exactly one 960-sample PCM frame
//! - Encoder: one 960-sample PCM frame → one compressed wire frame
//!
//! When libopus cannot be initialized both directions degrade to raw i16
//! passthrough so a connection still carries audio, just uncompressed.

use anyhow::Result;

/// Wire sample rate announced in the hello handshake.
pub const SAMPLE_RATE: u32 = 16000;
/// Wire channel count. Mono only.
pub const CHANNELS: u8 = 1;
/// Wire frame duration in milliseconds.
pub const FRAME_DURATION_MS: u32 = 60;
/// Samples per frame: 16 kHz * 60 ms.
pub const FRAME_SAMPLES: usize = 960;

// Worst-case Opus packet size for one frame. Same headroom the device side
// uses for its encode buffer.
const MAX_PACKET_BYTES: usize = 4000;

/// A full frame of silence, used as the substitute for undecodable input.
pub fn silence_frame() -> Vec<i16> {
    vec![0i16; FRAME_SAMPLES]
}

/// Check codec availability once at startup so the degraded-passthrough
/// warning is surfaced a single time rather than per connection.
pub fn codec_available() -> bool {
    opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono).is_ok()
        && opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip).is_ok()
}

// ======================== Frame Decoder ========================

/// Stateful decoder for inbound wire frames.
pub enum FrameDecoder {
    Opus(opus::Decoder),
    /// Degraded mode: wire frames are interpreted as raw little-endian i16 PCM.
    Passthrough,
}

impl FrameDecoder {
    pub fn new() -> Self {
        match opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono) {
            Ok(decoder) => FrameDecoder::Opus(decoder),
            Err(e) => {
                tracing::debug!("Opus decoder init failed ({}), using passthrough", e);
                FrameDecoder::Passthrough
            }
        }
    }

    /// Clear decoder state. Called at the start of every recording so no
    /// predictor state leaks across utterances.
    pub fn reset(&mut self) {
        if let FrameDecoder::Opus(decoder) = self {
            if let Err(e) = decoder.reset_state() {
                tracing::warn!("Opus decoder reset failed: {}", e);
            }
        }
    }

    /// Decode one wire frame into exactly `FRAME_SAMPLES` PCM samples.
    ///
    /// Errors do not abort the session; the caller substitutes
    /// [`silence_frame`] to keep the recording timeline aligned with
    /// wall-clock frame cadence.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        match self {
            FrameDecoder::Opus(decoder) => {
                let mut pcm = vec![0i16; FRAME_SAMPLES];
                let decoded = decoder.decode(data, &mut pcm, false)?;
                anyhow::ensure!(
                    decoded == FRAME_SAMPLES,
                    "unexpected frame size: {} samples",
                    decoded
                );
                Ok(pcm)
            }
            FrameDecoder::Passthrough => {
                anyhow::ensure!(data.len() % 2 == 0, "odd PCM payload length: {}", data.len());
                Ok(data
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect())
            }
        }
    }
}

// ======================== Frame Encoder ========================

/// Stateful encoder for outbound wire frames.
pub enum FrameEncoder {
    Opus(opus::Encoder),
    /// Degraded mode: PCM samples are shipped as raw little-endian bytes.
    Passthrough,
}

impl FrameEncoder {
    pub fn new() -> Self {
        match opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip) {
            Ok(encoder) => FrameEncoder::Opus(encoder),
            Err(e) => {
                tracing::debug!("Opus encoder init failed ({}), using passthrough", e);
                FrameEncoder::Passthrough
            }
        }
    }

    /// Encode one full PCM frame. Input length must equal `FRAME_SAMPLES`.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        anyhow::ensure!(
            pcm.len() == FRAME_SAMPLES,
            "encode input must be one full frame, got {} samples",
            pcm.len()
        );
        match self {
            FrameEncoder::Opus(encoder) => {
                let mut packet = vec![0u8; MAX_PACKET_BYTES];
                let encoded = encoder.encode(pcm, &mut packet)?;
                packet.truncate(encoded);
                Ok(packet)
            }
            FrameEncoder::Passthrough => {
                Ok(pcm.iter().flat_map(|s| s.to_le_bytes()).collect())
            }
        }
    }
}
