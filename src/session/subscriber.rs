//! Subscriber handle
//!
//! A subscriber is one HTTP client attached to a session. The handle owns the
//! client's buffer cursor and its place in the subscriber count; dropping it
//! (normal end, error or client disconnect) unsubscribes exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::Stream;

use super::stream::StreamSession;
use crate::buffer::BufferReader;
use crate::error::{RelayError, Result};

/// One client's subscription to a stream session
pub struct SubscriberHandle {
    session: Arc<StreamSession>,
    reader: BufferReader,
    joined_at: Instant,
    bytes_read: u64,
    /// Set once a read reports end of stream or an error
    finished: bool,
}

impl SubscriberHandle {
    pub(crate) fn new(session: Arc<StreamSession>, reader: BufferReader) -> Self {
        Self {
            session,
            reader,
            joined_at: Instant::now(),
            bytes_read: 0,
            finished: false,
        }
    }

    /// Session this subscriber is attached to
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Bytes delivered to this subscriber so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Time since the subscriber joined
    pub fn connected_for(&self) -> Duration {
        self.joined_at.elapsed()
    }

    /// Next chunk for this subscriber
    ///
    /// `Ok(None)` means the producer ended cleanly and everything buffered
    /// has been delivered. A producer failure, stop or shutdown surfaces as
    /// `BufferClosed` so the response is cut short instead of ending normally.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        let chunk = match self.reader.read().await {
            Ok(chunk) => chunk,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        match chunk {
            Some(ref chunk) => self.bytes_read += chunk.len() as u64,
            None => self.finished = true,
        }
        Ok(chunk)
    }

    /// Turn the handle into a byte stream for a response body
    ///
    /// The stream yields at most one error and then ends. The handle is
    /// dropped when the stream is, which covers client disconnects.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        futures::stream::unfold(Some(self), |state| async move {
            let mut handle = state?;
            match handle.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(handle))),
                Ok(None) => None,
                Err(e) => {
                    let cause = handle.session.runtime_error();
                    tracing::debug!(
                        stream = %handle.session.name(),
                        session_id = handle.session.id(),
                        bytes = handle.bytes_read,
                        error = %e,
                        cause = cause.as_ref().map(tracing::field::display),
                        "Subscriber stream ended with error"
                    );
                    Some((Err(e), None))
                }
            }
        })
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        let connected_ms = self.connected_for().as_millis() as u64;
        if self.finished {
            tracing::debug!(
                stream = %self.session.name(),
                session_id = self.session.id(),
                bytes = self.bytes_read,
                connected_ms = connected_ms,
                "Subscriber detached"
            );
        } else {
            tracing::debug!(
                stream = %self.session.name(),
                session_id = self.session.id(),
                bytes = self.bytes_read,
                connected_ms = connected_ms,
                reason = %RelayError::ClientDisconnected,
                "Subscriber detached"
            );
        }
        self.session.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("stream", &self.session.name())
            .field("session_id", &self.session.id())
            .field("reader", &self.reader.id())
            .field("bytes_read", &self.bytes_read)
            .field("finished", &self.finished)
            .finish()
    }
}
