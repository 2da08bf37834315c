//! Relay buffer configuration

/// Default ring capacity (16 MiB)
pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;

/// Default upper bound on bytes handed out by a single read
pub const DEFAULT_MAX_READ: usize = 256 * 1024;

/// What the writer does when the ring is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// The producer waits for the slowest reader
    #[default]
    Block,
    /// Readers lagging at least `max_lag` bytes, or too far behind for the
    /// pending chunk to fit, are evicted when the ring is full
    DropSlowReader { max_lag: usize },
}

/// Relay buffer configuration
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Ring capacity in bytes
    pub capacity: usize,

    /// Maximum bytes returned by one read
    pub max_read: usize,

    /// Full-buffer behaviour
    pub policy: BackpressurePolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_read: DEFAULT_MAX_READ,
            policy: BackpressurePolicy::Block,
        }
    }
}

impl BufferConfig {
    /// Set the ring capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the per-read limit
    pub fn max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    /// Set the backpressure policy
    pub fn policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = policy;
        self
    }
}
