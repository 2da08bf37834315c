//! Registry configuration
//!
//! Settings shared by every session the registry creates.

use std::time::Duration;

use crate::buffer::{BackpressurePolicy, BufferConfig};

/// Configuration for the session registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Relay buffer settings for each session
    pub buffer: BufferConfig,

    /// How long a stopping producer may take before its task is aborted
    pub stop_timeout: Duration,

    /// Re-chunk producer output on MPEG-TS packet boundaries
    pub align_ts_packets: bool,

    /// Attempts made when a lookup races a retiring session
    pub subscribe_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            stop_timeout: Duration::from_secs(5),
            align_ts_packets: true,
            subscribe_attempts: 3,
        }
    }
}

impl RegistryConfig {
    /// Set the relay buffer capacity
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer = self.buffer.capacity(capacity);
        self
    }

    /// Set the backpressure policy
    pub fn backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.buffer = self.buffer.policy(policy);
        self
    }

    /// Set the producer stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Enable or disable TS packet alignment
    pub fn align_ts_packets(mut self, enabled: bool) -> Self {
        self.align_ts_packets = enabled;
        self
    }
}
