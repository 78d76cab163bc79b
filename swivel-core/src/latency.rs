//! Latency and timing model.
//!
//! Pure functions of configuration, no side effects. The output figure
//! doubles when output-ready acknowledgments are unavailable: the driver can
//! only start consuming a host-filled buffer at the second switch boundary
//! after the grant, so host data written during callback N plays in period
//! N + 2 instead of N + 1.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reported input/output latency in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    pub input_frames: u64,
    pub output_frames: u64,
}

/// Compute the reported latency for a session configuration.
pub fn report(frames_per_buffer: usize, output_ready_supported: bool) -> LatencyReport {
    let period = frames_per_buffer as u64;
    LatencyReport {
        input_frames: period,
        output_frames: period * if output_ready_supported { 1 } else { 2 },
    }
}

/// Wall-clock duration of one buffer period.
pub fn period_duration(frames_per_buffer: usize, sample_rate: u32) -> Duration {
    debug_assert!(sample_rate > 0);
    Duration::from_nanos((frames_per_buffer as u64).saturating_mul(1_000_000_000) / sample_rate as u64)
}

/// Whether a callback dispatch missed its real-time deadline.
pub fn is_overrun(elapsed: Duration, budget: Duration) -> bool {
    elapsed > budget
}
