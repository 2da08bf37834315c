//! Session registry implementation
//!
//! The process-wide table of live stream sessions, keyed by stream name.
//! Sessions are created lazily from the static stream definitions on first
//! subscription and remove themselves when they stop or fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::config::RegistryConfig;
use super::definition::{validate_stream_name, StreamDefinition};
use crate::error::{RelayError, Result};
use crate::producer::{ProducerOptions, ProducerSource};
use crate::session::{StreamSession, SubscriberHandle};
use crate::stats::RegistryStats;

/// Central registry for all live stream sessions
///
/// The map lock is only held for lookups and inserts, never across an
/// await, so slow producer starts on one stream do not block the others.
pub struct SessionRegistry {
    /// Configured streams, fixed at startup
    definitions: HashMap<String, Arc<StreamDefinition>>,

    /// Live sessions by stream name
    sessions: Mutex<HashMap<String, Arc<StreamSession>>>,

    source: Arc<dyn ProducerSource>,
    options: Arc<ProducerOptions>,
    config: Arc<RegistryConfig>,
    next_session_id: AtomicU64,
    shut_down: AtomicBool,

    /// Handed to sessions so they can remove themselves
    this: Weak<SessionRegistry>,
}

impl SessionRegistry {
    /// Create a registry for the given stream definitions
    pub fn new(
        definitions: Vec<StreamDefinition>,
        source: Arc<dyn ProducerSource>,
        options: ProducerOptions,
        config: RegistryConfig,
    ) -> Arc<Self> {
        let definitions = definitions
            .into_iter()
            .map(|def| (def.name.clone(), Arc::new(def)))
            .collect();

        Arc::new_cyclic(|this| Self {
            definitions,
            sessions: Mutex::new(HashMap::new()),
            source,
            options: Arc::new(options),
            config: Arc::new(config),
            next_session_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Find the live session for `name`, creating it if needed
    ///
    /// Concurrent callers for the same name always get the same session.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<StreamSession>> {
        validate_stream_name(name)?;

        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| RelayError::UnknownStream(name.to_string()))?;

        let mut sessions = self.sessions.lock();

        if self.shut_down.load(Ordering::Acquire) {
            return Err(RelayError::SessionRetired(name.to_string()));
        }

        if let Some(session) = sessions.get(name) {
            return Ok(Arc::clone(session));
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(StreamSession::new(
            session_id,
            Arc::clone(definition),
            Arc::clone(&self.options),
            Arc::clone(&self.source),
            Arc::clone(&self.config),
            self.this.clone(),
        ));
        sessions.insert(name.to_string(), Arc::clone(&session));

        tracing::debug!(stream = %name, session_id = session_id, "Session created");

        Ok(session)
    }

    /// Remove the session for `name` if it is still `session_id`
    ///
    /// A stale session tearing down late must not evict its replacement.
    pub fn remove(&self, name: &str, session_id: u64) -> bool {
        let mut sessions = self.sessions.lock();

        match sessions.get(name) {
            Some(session) if session.id() == session_id => {
                sessions.remove(name);
                tracing::debug!(stream = %name, session_id = session_id, "Session removed");
                true
            }
            _ => false,
        }
    }

    /// Subscribe to `name`, starting its producer if this is the first client
    pub async fn subscribe(&self, name: &str) -> Result<SubscriberHandle> {
        let attempts = self.config.subscribe_attempts.max(1);

        for _ in 0..attempts {
            let session = self.get_or_create(name)?;

            match session.subscribe().await {
                Ok(handle) => return Ok(handle),
                Err(RelayError::SessionRetired(_)) => {
                    // Lost a race with a session that is going away
                    self.remove(name, session.id());
                }
                Err(e @ RelayError::ProducerStartFailed { .. }) => {
                    if session.retire_if_idle() {
                        self.remove(name, session.id());
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RelayError::SessionRetired(name.to_string()))
    }

    /// Get the live session for `name`, if any
    pub fn get(&self, name: &str) -> Option<Arc<StreamSession>> {
        self.sessions.lock().get(name).cloned()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Configured stream definitions, sorted by name
    pub fn definitions(&self) -> Vec<Arc<StreamDefinition>> {
        let mut defs: Vec<_> = self.definitions.values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of configured streams
    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }

    /// Definition for `name`, if configured
    pub fn definition(&self, name: &str) -> Option<Arc<StreamDefinition>> {
        self.definitions.get(name).cloned()
    }

    /// Snapshot statistics for every live session
    pub fn stats(&self) -> RegistryStats {
        let sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        let snapshots = sessions.iter().map(|s| s.stats()).collect();

        RegistryStats::new(self.definitions.len(), snapshots)
    }

    /// Stop every live session and refuse new ones
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);

        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        tracing::info!(sessions = sessions.len(), "Shutting down session registry");

        for session in sessions {
            session.shutdown();
        }
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("definitions", &self.definitions.len())
            .field("sessions", &self.session_count())
            .finish()
    }
}
