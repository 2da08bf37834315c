//! Options handed to a producer at start

use std::time::Duration;

/// Default User-Agent sent by the downloader
pub const DEFAULT_USER_AGENT: &str = "StreamPipe/1.0";

/// Producer start options
///
/// Passed through verbatim from the `options` section of the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerOptions {
    /// User-Agent header for upstream requests
    pub user_agent: String,

    /// Parallel segment download threads
    pub threads: u32,

    /// Upstream HTTP timeout; also bounds the wait for the first chunk
    pub timeout: Duration,

    /// Maximum bytes per chunk read from the producer
    pub buffer_size: usize,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            threads: 4,
            timeout: Duration::from_secs(20),
            buffer_size: 8 * 1024 * 1024, // 8MB
        }
    }
}

impl ProducerOptions {
    /// Set the User-Agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the segment thread count
    pub fn threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-read chunk size
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}
