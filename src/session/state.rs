//! Producer lifecycle state machine
//!
//! ```text
//! Idle ──► Starting ──► Running ──► Stopping ──► (destroyed)
//!   ▲          │            │
//!   └──────────┘            └──► Failed ──► (destroyed)
//!   start failed
//! ```
//!
//! `Stopping` and `Failed` are terminal for a session: it is removed from the
//! registry and never reused.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Producer state of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// No producer, no subscribers
    Idle,
    /// Producer start in progress
    Starting,
    /// Producer running and feeding the buffer
    Running,
    /// Last subscriber left or shutdown; producer being stopped
    Stopping,
    /// Producer ended or failed on its own
    Failed,
}

impl ProducerState {
    /// Whether the session can no longer accept subscribers
    pub fn is_retired(self) -> bool {
        matches!(self, ProducerState::Stopping | ProducerState::Failed)
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: ProducerState) -> bool {
        use ProducerState::*;

        matches!(
            (self, next),
            (Idle, Starting)
                | (Idle, Stopping)
                | (Starting, Running)
                | (Starting, Idle)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for ProducerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProducerState::Idle => "idle",
            ProducerState::Starting => "starting",
            ProducerState::Running => "running",
            ProducerState::Stopping => "stopping",
            ProducerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mutable per-session state, guarded by the session lock
#[derive(Debug)]
pub struct SessionState {
    /// Current producer state
    pub phase: ProducerState,

    /// Active subscribers
    pub subscribers: usize,

    /// Last producer error, if the producer failed
    pub last_error: Option<String>,

    /// When the producer reached `Running`
    pub started_at: Option<Instant>,

    /// Pump task feeding the buffer while running
    pub producer_task: Option<JoinHandle<()>>,
}

impl SessionState {
    /// Create idle state
    pub fn new() -> Self {
        Self {
            phase: ProducerState::Idle,
            subscribers: 0,
            last_error: None,
            started_at: None,
            producer_task: None,
        }
    }

    /// Move to `next` if the transition is legal; returns whether it happened
    pub fn transition(&mut self, next: ProducerState) -> bool {
        if !self.phase.can_transition_to(next) {
            tracing::debug!(from = %self.phase, to = %next, "Ignoring illegal state transition");
            return false;
        }

        self.phase = next;
        if next == ProducerState::Running {
            self.started_at = Some(Instant::now());
        }
        true
    }

    /// Record a subscriber joining
    pub fn add_subscriber(&mut self) -> usize {
        self.subscribers += 1;
        self.subscribers
    }

    /// Record a subscriber leaving
    pub fn remove_subscriber(&mut self) -> usize {
        self.subscribers = self.subscribers.saturating_sub(1);
        self.subscribers
    }

    /// Time the producer has been running
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_lifecycle() {
        let mut state = SessionState::new();
        assert_eq!(state.phase, ProducerState::Idle);

        assert!(state.transition(ProducerState::Starting));
        assert!(state.transition(ProducerState::Running));
        assert!(state.started_at.is_some());
        assert!(state.transition(ProducerState::Stopping));
        assert!(state.phase.is_retired());
    }

    #[test]
    fn test_start_failure_reverts_to_idle() {
        let mut state = SessionState::new();

        state.transition(ProducerState::Starting);
        assert!(state.transition(ProducerState::Idle));
        assert!(!state.phase.is_retired());
    }

    #[test]
    fn test_retired_states_are_terminal() {
        for terminal in [ProducerState::Stopping, ProducerState::Failed] {
            for next in [
                ProducerState::Idle,
                ProducerState::Starting,
                ProducerState::Running,
                ProducerState::Stopping,
                ProducerState::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut state = SessionState::new();

        assert!(!state.transition(ProducerState::Running));
        assert!(!state.transition(ProducerState::Failed));
        assert_eq!(state.phase, ProducerState::Idle);
    }

    #[test]
    fn test_subscriber_count_saturates() {
        let mut state = SessionState::new();

        assert_eq!(state.add_subscriber(), 1);
        assert_eq!(state.remove_subscriber(), 0);
        assert_eq!(state.remove_subscriber(), 0);
    }
}
