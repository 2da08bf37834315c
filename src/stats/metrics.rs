//! Statistics for relay sessions

use std::time::Duration;

use crate::session::ProducerState;

/// Point-in-time view of one stream session
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Stream name
    pub stream: String,
    /// Session ID
    pub session_id: u64,
    /// Producer state
    pub state: ProducerState,
    /// Active subscribers
    pub subscribers: usize,
    /// Total bytes written into the relay buffer
    pub bytes_relayed: u64,
    /// Bytes currently held for the slowest reader
    pub buffered: usize,
    /// Time since the producer started running
    pub uptime: Option<Duration>,
    /// Time since the session was created
    pub age: Duration,
}

impl SessionStats {
    /// Average producer bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.unwrap_or_default().as_secs();
        if secs > 0 {
            (self.bytes_relayed * 8) / secs
        } else {
            0
        }
    }

    /// Whether the producer is feeding the buffer
    pub fn is_running(&self) -> bool {
        self.state == ProducerState::Running
    }
}

/// Registry-wide statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Configured streams
    pub defined_streams: usize,
    /// Live sessions
    pub active_sessions: usize,
    /// Subscribers across all sessions
    pub subscribers: usize,
    /// Bytes relayed by the live sessions
    pub bytes_relayed: u64,
    /// Per-session snapshots, sorted by stream name
    pub sessions: Vec<SessionStats>,
}

impl RegistryStats {
    /// Aggregate per-session snapshots
    pub fn new(defined_streams: usize, mut sessions: Vec<SessionStats>) -> Self {
        sessions.sort_by(|a, b| a.stream.cmp(&b.stream));

        Self {
            defined_streams,
            active_sessions: sessions.len(),
            subscribers: sessions.iter().map(|s| s.subscribers).sum(),
            bytes_relayed: sessions.iter().map(|s| s.bytes_relayed).sum(),
            sessions,
        }
    }
}
