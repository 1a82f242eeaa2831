use std::time::Duration;

use ak_core::BackoffPolicy;

/// Attribution flow orchestrator tuning.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Pause between applying a remote-call response and re-evaluating the
    /// flow, covering storage-write propagation latency. Without it a pass
    /// can read stale state on the very next line and issue a duplicate
    /// call.
    pub settle_delay: Duration,
    /// Per-operation retry backoff tuning.
    pub backoff: BackoffPolicy,
    /// Capacity of the orchestrator command channel.
    pub command_buffer: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            backoff: BackoffPolicy::default(),
            command_buffer: 32,
        }
    }
}

impl FlowConfig {
    /// Config with no settle delay, for tests that drive the flow with a
    /// paused clock.
    pub fn immediate() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
