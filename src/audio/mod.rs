//! audio - Frame codec and signal helpers for the voice session pipeline
//!
//! Everything here operates on the single fixed wire profile the gateway
//! announces during the hello handshake: Opus, 16 kHz, mono, 60 ms frames.
//! Resampling and channel conversion are deliberately absent.

pub mod codec;
pub mod energy;
pub mod gain;

pub use codec::{FrameDecoder, FrameEncoder, FRAME_DURATION_MS, FRAME_SAMPLES, SAMPLE_RATE};
