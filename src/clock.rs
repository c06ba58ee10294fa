// src/clock.rs

use chrono::Utc;
use std::fmt::Debug;
use std::time::Duration;

/// Source of "now" for the limiter math.
///
/// Timestamps are offsets since the UNIX epoch so that sliding-window slots
/// line up on absolute sub-window boundaries and so they can be handed to
/// Redis scripts unchanged.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Duration;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        let micros = Utc::now().timestamp_micros();
        Duration::from_micros(micros.max(0) as u64)
    }
}

/// Signed difference `later - earlier`, floored at zero.
///
/// Wall clocks can step backwards; a negative elapsed time is treated as none.
pub(crate) fn elapsed_since(earlier: Duration, later: Duration) -> Duration {
    later.saturating_sub(earlier)
}
