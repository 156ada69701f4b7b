//! Frame loudness estimate used as the voice-activity signal.

/// Root-mean-square of one PCM frame, truncated to an integer.
///
/// Stateless and per-frame only; no averaging across frames. An empty or
/// all-zero frame yields 0.
pub fn rms(pcm: &[i16]) -> u32 {
    if pcm.is_empty() {
        return 0;
    }
    let sum_squares: u64 = pcm
        .iter()
        .map(|&s| {
            let v = s as i64;
            (v * v) as u64
        })
        .sum();
    ((sum_squares / pcm.len() as u64) as f64).sqrt() as u32
}
