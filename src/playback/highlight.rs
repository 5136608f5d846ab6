//! Maps elapsed clip time to the token being spoken.
//!
//! There is no per-word timing from the synthesizer, so the default mapper
//! assumes every token takes the same share of the clip. This is a linear
//! approximation and will drift on long or uneven words. A mapper backed by
//! real alignment data can be plugged in through [`TimeToTokenMapper`]
//! without touching the controller.

use std::time::Duration;

pub trait TimeToTokenMapper: Send + Sync {
    /// Index of the token spoken at `elapsed`, or `None` when it can't be known
    fn token_at(&self, elapsed: Duration, duration: Option<Duration>, token_count: usize) -> Option<usize>;
}

/// Uniform per-token duration
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTimeMapper;

impl TimeToTokenMapper for LinearTimeMapper {
    fn token_at(&self, elapsed: Duration, duration: Option<Duration>, token_count: usize) -> Option<usize> {
        highlight(
            elapsed.as_secs_f64(),
            duration.map(|d| d.as_secs_f64()).unwrap_or(0.0),
            token_count,
        )
    }
}

/// `floor(elapsed / duration * token_count)` clamped to the token range.
///
/// `None` when the duration is unknown (zero, negative, NaN) or there are no
/// tokens.
pub fn highlight(elapsed: f64, duration: f64, token_count: usize) -> Option<usize> {
    if token_count == 0 || !duration.is_finite() || duration <= 0.0 || elapsed.is_nan() {
        return None;
    }

    let ratio = (elapsed / duration).max(0.0);
    let index = (ratio * token_count as f64).floor();
    let last = token_count - 1;

    if index >= last as f64 {
        Some(last)
    } else {
        Some(index as usize)
    }
}
