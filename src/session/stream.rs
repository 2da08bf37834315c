//! Stream session
//!
//! One session per active stream name. It owns the producer pump task and the
//! relay buffer, and counts subscribers. The first subscriber starts the
//! producer; the last one to leave stops it. A producer that ends or fails on
//! its own takes the whole session down with it.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::{ProducerState, SessionState};
use super::subscriber::SubscriberHandle;
use crate::buffer::{BufferReader, CloseReason, RelayBuffer};
use crate::error::{RelayError, Result};
use crate::producer::{AlignedStream, ProducerOptions, ProducerSource, ProducerStream};
use crate::registry::{RegistryConfig, SessionRegistry, StreamDefinition};
use crate::stats::SessionStats;

/// How the pump loop ended
#[derive(Debug)]
enum PumpExit {
    /// Stop requested or buffer closed from the consumer side
    Cancelled,
    /// Producer reached end of stream
    EndOfStream,
    /// Producer returned an error
    Failed(String),
}

/// Relay session for one stream name
pub struct StreamSession {
    id: u64,
    definition: Arc<StreamDefinition>,
    options: Arc<ProducerOptions>,
    source: Arc<dyn ProducerSource>,
    config: Arc<RegistryConfig>,
    buffer: Arc<RelayBuffer>,
    state: Mutex<SessionState>,
    /// Serializes producer start so concurrent first subscribers start it once
    start_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    registry: Weak<SessionRegistry>,
    created_at: Instant,
}

impl StreamSession {
    /// Create an idle session
    pub(crate) fn new(
        id: u64,
        definition: Arc<StreamDefinition>,
        options: Arc<ProducerOptions>,
        source: Arc<dyn ProducerSource>,
        config: Arc<RegistryConfig>,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        let buffer = Arc::new(RelayBuffer::new(config.buffer.clone()));

        Self {
            id,
            definition,
            options,
            source,
            config,
            buffer,
            state: Mutex::new(SessionState::new()),
            start_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            registry,
            created_at: Instant::now(),
        }
    }

    /// Unique session ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stream name
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Stream definition
    pub fn definition(&self) -> &StreamDefinition {
        &self.definition
    }

    /// Current producer state
    pub fn state(&self) -> ProducerState {
        self.state.lock().phase
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers
    }

    /// Last producer error, if the producer failed
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// The runtime failure that ended this session, if any
    ///
    /// `None` for a start failure, a clean end of stream or a stop.
    pub fn runtime_error(&self) -> Option<RelayError> {
        let state = self.state.lock();
        if state.phase != ProducerState::Failed {
            return None;
        }

        state
            .last_error
            .as_ref()
            .map(|message| RelayError::ProducerRuntimeError {
                stream: self.name().to_string(),
                message: message.clone(),
            })
    }

    /// Subscribe to this stream, starting the producer if needed
    ///
    /// The subscriber joins at the live position: it sees bytes written after
    /// this call returns its handle, never anything older. The first
    /// subscriber's reader is attached before the producer starts, so it sees
    /// the stream from its first byte.
    pub async fn subscribe(self: &Arc<Self>) -> Result<SubscriberHandle> {
        let _start_guard = self.start_lock.lock().await;

        {
            let mut state = self.state.lock();
            match state.phase {
                ProducerState::Running => {
                    let reader = BufferReader::attach(Arc::clone(&self.buffer))?;
                    let subscribers = state.add_subscriber();
                    tracing::info!(
                        stream = %self.name(),
                        session_id = self.id,
                        subscribers = subscribers,
                        "Subscriber added"
                    );
                    return Ok(SubscriberHandle::new(Arc::clone(self), reader));
                }
                ProducerState::Idle => {
                    state.transition(ProducerState::Starting);
                    state.add_subscriber();
                }
                ProducerState::Starting | ProducerState::Stopping | ProducerState::Failed => {
                    return Err(RelayError::SessionRetired(self.name().to_string()));
                }
            }
        }

        let mut pending = PendingStart::new(self);
        let reader = BufferReader::attach(Arc::clone(&self.buffer))?;

        tracing::info!(
            stream = %self.name(),
            session_id = self.id,
            url = %self.definition.source_url,
            "Starting producer"
        );

        let stream = match self
            .source
            .start(&self.definition.source_url, &self.options)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    stream = %self.name(),
                    session_id = self.id,
                    error = %e,
                    "Producer failed to start"
                );
                self.state.lock().last_error = Some(e.to_string());
                return Err(RelayError::ProducerStartFailed {
                    stream: self.name().to_string(),
                    source: e,
                });
            }
        };

        let stream: Box<dyn ProducerStream> = if self.config.align_ts_packets {
            Box::new(AlignedStream::new(stream))
        } else {
            stream
        };

        {
            let mut state = self.state.lock();
            if !state.transition(ProducerState::Running) {
                // Shut down while the producer was starting
                drop(state);
                tokio::spawn(stop_detached(stream));
                return Err(RelayError::SessionRetired(self.name().to_string()));
            }

            let task = tokio::spawn(Arc::clone(self).pump(stream));
            state.producer_task = Some(task);
        }
        pending.commit();

        tracing::info!(
            stream = %self.name(),
            session_id = self.id,
            subscribers = 1,
            "Producer running"
        );

        Ok(SubscriberHandle::new(Arc::clone(self), reader))
    }

    /// Drop one subscriber; the last one out stops the producer
    pub(crate) fn unsubscribe(&self) {
        let task = {
            let mut state = self.state.lock();
            let remaining = state.remove_subscriber();

            tracing::debug!(
                stream = %self.name(),
                session_id = self.id,
                subscribers = remaining,
                "Subscriber removed"
            );

            if remaining > 0 || state.phase != ProducerState::Running {
                return;
            }
            state.transition(ProducerState::Stopping);
            state.producer_task.take()
        };

        tracing::info!(
            stream = %self.name(),
            session_id = self.id,
            "Last subscriber left, stopping producer"
        );
        self.teardown(CloseReason::Stopped, task);
        self.detach_from_registry();
    }

    /// Stop the session regardless of subscribers
    pub(crate) fn shutdown(&self) {
        let task = {
            let mut state = self.state.lock();
            if !state.transition(ProducerState::Stopping) {
                return;
            }
            state.producer_task.take()
        };

        tracing::info!(stream = %self.name(), session_id = self.id, "Session shut down");
        self.teardown(CloseReason::Shutdown, task);
    }

    /// Retire an idle session left behind by a failed start
    ///
    /// Returns `true` if the session was idle with no subscribers and is now
    /// retired.
    pub(crate) fn retire_if_idle(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase != ProducerState::Idle || state.subscribers > 0 {
                return false;
            }
            state.transition(ProducerState::Stopping);
        }

        self.buffer.close(CloseReason::Stopped);
        true
    }

    /// Snapshot session statistics
    pub fn stats(&self) -> SessionStats {
        let buffer = self.buffer.stats();
        let state = self.state.lock();

        SessionStats {
            stream: self.definition.name.clone(),
            session_id: self.id,
            state: state.phase,
            subscribers: state.subscribers,
            bytes_relayed: buffer.bytes_written,
            buffered: buffer.buffered,
            uptime: state.uptime(),
            age: self.created_at.elapsed(),
        }
    }

    /// Cancel the producer, close the buffer, and reap the pump task
    fn teardown(&self, reason: CloseReason, task: Option<JoinHandle<()>>) {
        self.cancel.cancel();
        self.buffer.close(reason);

        if let Some(task) = task {
            self.reap(task);
        }

        let stats = self.stats();
        tracing::info!(
            stream = %stats.stream,
            session_id = stats.session_id,
            bytes = stats.bytes_relayed,
            bitrate = stats.bitrate(),
            "Session closed"
        );
    }

    /// Wait for the pump task to exit, aborting it after `stop_timeout`
    fn reap(&self, task: JoinHandle<()>) {
        let timeout = self.config.stop_timeout;
        let stream = self.definition.name.clone();
        let session_id = self.id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let abort = task.abort_handle();
                    if tokio::time::timeout(timeout, task).await.is_err() {
                        tracing::warn!(
                            stream = %stream,
                            session_id = session_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Producer did not stop in time, aborting"
                        );
                        abort.abort();
                    }
                });
            }
            Err(_) => task.abort(),
        }
    }

    fn detach_from_registry(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.name(), self.id);
        }
    }

    /// Copy producer output into the buffer until stopped or the stream ends
    async fn pump(self: Arc<Self>, mut stream: Box<dyn ProducerStream>) {
        let exit = loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => break PumpExit::Cancelled,
                chunk = stream.read_chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    if self.buffer.write(&bytes).await.is_err() {
                        break PumpExit::Cancelled;
                    }
                }
                Ok(None) => break PumpExit::EndOfStream,
                Err(e) => break PumpExit::Failed(e.to_string()),
            }
        };

        if let Err(e) = stream.stop().await {
            tracing::warn!(stream = %self.name(), error = %e, "Producer stop failed");
        }

        match exit {
            PumpExit::Cancelled => {
                tracing::debug!(stream = %self.name(), session_id = self.id, "Producer stopped");
            }
            PumpExit::EndOfStream => self.producer_finished(None),
            PumpExit::Failed(message) => self.producer_finished(Some(message)),
        }
    }

    /// Producer ended on its own: fail the session and leave the registry
    fn producer_finished(&self, error: Option<String>) {
        {
            let mut state = self.state.lock();
            if !state.transition(ProducerState::Failed) {
                return;
            }
            state.last_error = error.clone();
            // This is our own task's handle; nothing left to join
            state.producer_task.take();
        }

        let reason = match error {
            Some(message) => {
                let err = RelayError::ProducerRuntimeError {
                    stream: self.name().to_string(),
                    message: message.clone(),
                };
                tracing::error!(session_id = self.id, error = %err, "Producer failed");
                CloseReason::ProducerFailed(message)
            }
            None => {
                tracing::info!(stream = %self.name(), session_id = self.id, "Producer reached end of stream");
                CloseReason::EndOfStream
            }
        };

        self.cancel.cancel();
        self.buffer.close(reason);
        self.detach_from_registry();
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("name", &self.definition.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Reverts a `Starting` session to `Idle` unless committed
///
/// Covers both a failed start and a subscribe future dropped mid-start
/// (client gone while the producer was starting).
struct PendingStart<'a> {
    session: &'a StreamSession,
    committed: bool,
}

impl<'a> PendingStart<'a> {
    fn new(session: &'a StreamSession) -> Self {
        Self {
            session,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let mut state = self.session.state.lock();
        state.remove_subscriber();
        state.transition(ProducerState::Idle);
    }
}

async fn stop_detached(mut stream: Box<dyn ProducerStream>) {
    if let Err(e) = stream.stop().await {
        tracing::warn!(error = %e, "Failed to stop orphaned producer");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::producer::{ChannelSource, ProducerError};

    /// Producer whose start never completes
    struct HangingSource;

    #[async_trait]
    impl ProducerSource for HangingSource {
        async fn start(
            &self,
            _url: &str,
            _options: &ProducerOptions,
        ) -> std::result::Result<Box<dyn ProducerStream>, ProducerError> {
            std::future::pending().await
        }
    }

    /// Producer that never yields and never finishes stopping
    struct StuckSource {
        dropped: Arc<AtomicBool>,
    }

    struct StuckStream {
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ProducerSource for StuckSource {
        async fn start(
            &self,
            _url: &str,
            _options: &ProducerOptions,
        ) -> std::result::Result<Box<dyn ProducerStream>, ProducerError> {
            Ok(Box::new(StuckStream {
                dropped: Arc::clone(&self.dropped),
            }))
        }
    }

    #[async_trait]
    impl ProducerStream for StuckStream {
        async fn read_chunk(&mut self) -> std::result::Result<Option<Bytes>, ProducerError> {
            std::future::pending().await
        }

        async fn stop(&mut self) -> std::result::Result<(), ProducerError> {
            std::future::pending().await
        }
    }

    impl Drop for StuckStream {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn session(source: Arc<dyn ProducerSource>, config: RegistryConfig) -> Arc<StreamSession> {
        Arc::new(StreamSession::new(
            7,
            Arc::new(StreamDefinition::new("nasatv", "memory://nasatv").unwrap()),
            Arc::new(ProducerOptions::default()),
            source,
            Arc::new(config),
            Weak::new(),
        ))
    }

    #[tokio::test]
    async fn test_cancelled_start_reverts_to_idle() {
        let session = session(Arc::new(HangingSource), RegistryConfig::default());

        let result = tokio::time::timeout(Duration::from_millis(50), session.subscribe()).await;
        assert!(result.is_err());

        assert_eq!(session.state(), ProducerState::Idle);
        assert_eq!(session.subscriber_count(), 0);
        assert!(session.retire_if_idle());
        assert!(matches!(
            session.subscribe().await,
            Err(RelayError::SessionRetired(_))
        ));
    }

    #[tokio::test]
    async fn test_ts_alignment_applied() {
        let (source, mut feeds) = ChannelSource::new();
        let session = session(source, RegistryConfig::default());

        let mut handle = session.subscribe().await.unwrap();
        let feed = feeds.recv().await.unwrap();

        feed.send(Bytes::from(vec![0x47; 200])).await.unwrap();
        assert_eq!(handle.read().await.unwrap().unwrap().len(), 188);

        feed.finish();
        assert_eq!(handle.read().await.unwrap().unwrap().len(), 12);
        assert!(handle.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let (source, mut feeds) = ChannelSource::new();
        let config = RegistryConfig::default().align_ts_packets(false);
        let session = session(source, config);

        let idle = session.stats();
        assert_eq!(idle.state, ProducerState::Idle);
        assert!(idle.uptime.is_none());

        let mut handle = session.subscribe().await.unwrap();
        let feed = feeds.recv().await.unwrap();
        feed.send(Bytes::from_static(b"abc")).await.unwrap();
        handle.read().await.unwrap();

        let stats = session.stats();
        assert_eq!(stats.session_id, 7);
        assert_eq!(stats.stream, "nasatv");
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.bytes_relayed, 3);
        assert!(stats.uptime.is_some());
    }

    #[tokio::test]
    async fn test_last_unsubscribe_without_registry() {
        let (source, mut feeds) = ChannelSource::new();
        let session = session(source, RegistryConfig::default());

        let handle = session.subscribe().await.unwrap();
        let feed = feeds.recv().await.unwrap();
        drop(handle);

        assert_eq!(session.state(), ProducerState::Stopping);
        tokio::time::timeout(Duration::from_secs(1), feed.stopped())
            .await
            .unwrap();
        assert!(matches!(
            session.subscribe().await,
            Err(RelayError::SessionRetired(_))
        ));
    }

    #[tokio::test]
    async fn test_stuck_producer_aborted_after_stop_timeout() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = Arc::new(StuckSource {
            dropped: Arc::clone(&dropped),
        });
        let config = RegistryConfig::default().stop_timeout(Duration::from_millis(100));
        let session = session(source, config);

        let handle = session.subscribe().await.unwrap();
        assert_eq!(session.state(), ProducerState::Running);
        drop(handle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!dropped.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(session.state(), ProducerState::Stopping);
    }

    #[tokio::test]
    async fn test_late_subscriber_starts_on_packet_boundary() {
        let (source, mut feeds) = ChannelSource::new();
        let session = session(source, RegistryConfig::default().buffer_capacity(400));

        let mut early = session.subscribe().await.unwrap();
        let feed = feeds.recv().await.unwrap();

        for marker in 1u8..=3 {
            let mut packet = vec![marker; 188];
            packet[0] = 0x47;
            feed.send(Bytes::from(packet)).await.unwrap();
        }

        // The third packet does not fit until `early` reads
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.stats().bytes_relayed, 376);

        let mut late = session.subscribe().await.unwrap();
        assert_eq!(early.read().await.unwrap().unwrap().len(), 376);

        let chunk = late.read().await.unwrap().unwrap();
        assert_eq!(chunk.len(), 188);
        assert_eq!(chunk[0], 0x47);
        assert_eq!(chunk[1], 3);
    }

    #[tokio::test]
    async fn test_runtime_error_reported() {
        let (source, mut feeds) = ChannelSource::new();
        let session = session(source, RegistryConfig::default().align_ts_packets(false));

        let mut handle = session.subscribe().await.unwrap();
        assert!(session.runtime_error().is_none());

        feeds.recv().await.unwrap().fail("upstream returned 500").await;
        assert!(matches!(handle.read().await, Err(RelayError::BufferClosed)));

        assert_eq!(session.state(), ProducerState::Failed);
        match session.runtime_error() {
            Some(RelayError::ProducerRuntimeError { stream, message }) => {
                assert_eq!(stream, "nasatv");
                assert_eq!(message, "upstream returned 500");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
