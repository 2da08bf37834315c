//! Bounded fan-out ring buffer
//!
//! One producer writes sequentially; every reader owns an absolute read
//! position and consumes independently. The writer may only reuse ring space
//! that every attached reader has already consumed, so a full ring either
//! blocks the writer or (under `DropSlowReader`) evicts the laggards.
//!
//! Positions are absolute byte offsets since the buffer was created. A new
//! reader starts at the current write position and never sees older bytes.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::config::{BackpressurePolicy, BufferConfig};
use crate::error::{RelayError, Result};

/// Identifier of a reader cursor within one buffer
pub type ReaderId = u64;

/// Why a buffer was closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Producer reached end of stream; readers drain what is buffered
    EndOfStream,
    /// Producer failed mid-stream
    ProducerFailed(String),
    /// Last subscriber left
    Stopped,
    /// Process is shutting down
    Shutdown,
}

impl CloseReason {
    /// Whether readers may still consume buffered bytes after this close
    pub fn drains(&self) -> bool {
        matches!(self, CloseReason::EndOfStream)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::EndOfStream => write!(f, "end of stream"),
            CloseReason::ProducerFailed(msg) => write!(f, "producer failed: {}", msg),
            CloseReason::Stopped => write!(f, "stopped"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Point-in-time view of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    /// Ring capacity in bytes
    pub capacity: usize,
    /// Total bytes ever written
    pub bytes_written: u64,
    /// Bytes not yet consumed by the slowest reader
    pub buffered: usize,
    /// Attached (non-evicted) readers
    pub readers: usize,
    /// Close reason, if closed
    pub closed: Option<CloseReason>,
}

#[derive(Debug)]
struct Cursor {
    pos: u64,
    /// Set when the writer evicted this reader; holds its lag at eviction
    evicted: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    ring: Box<[u8]>,
    write_pos: u64,
    readers: HashMap<ReaderId, Cursor>,
    next_reader_id: ReaderId,
    closed: Option<CloseReason>,
}

impl Inner {
    /// Position of the slowest live reader, or the write position when none
    fn min_read_pos(&self) -> u64 {
        self.readers
            .values()
            .filter(|c| c.evicted.is_none())
            .map(|c| c.pos)
            .min()
            .unwrap_or(self.write_pos)
    }

    fn buffered(&self) -> usize {
        (self.write_pos - self.min_read_pos()) as usize
    }

    fn free_space(&self) -> usize {
        self.ring.len() - self.buffered()
    }

    fn copy_in(&mut self, data: &[u8]) {
        let cap = self.ring.len();
        let start = (self.write_pos % cap as u64) as usize;
        let first = data.len().min(cap - start);

        self.ring[start..start + first].copy_from_slice(&data[..first]);
        self.ring[..data.len() - first].copy_from_slice(&data[first..]);
        self.write_pos += data.len() as u64;
    }

    fn copy_out(ring: &[u8], from: u64, len: usize) -> Bytes {
        let cap = ring.len();
        let start = (from % cap as u64) as usize;
        let first = len.min(cap - start);

        let mut out = BytesMut::with_capacity(len);
        out.extend_from_slice(&ring[start..start + first]);
        out.extend_from_slice(&ring[..len - first]);
        out.freeze()
    }

    /// Evict every live reader lagging at least `max_lag` bytes
    fn evict_lagging(&mut self, max_lag: usize) -> usize {
        let write_pos = self.write_pos;
        let mut evicted = 0;

        for (id, cursor) in self.readers.iter_mut() {
            let lag = write_pos - cursor.pos;
            if cursor.evicted.is_none() && lag >= max_lag as u64 {
                cursor.evicted = Some(lag);
                evicted += 1;
                tracing::warn!(reader = *id, lag = lag, "Evicting slow reader");
            }
        }

        evicted
    }
}

/// Fixed-capacity single-writer, multi-reader byte ring
pub struct RelayBuffer {
    inner: Mutex<Inner>,
    /// Signalled when new bytes are written or the buffer closes
    data_ready: Notify,
    /// Signalled when readers consume, detach, or the buffer closes
    space_ready: Notify,
    config: BufferConfig,
}

impl RelayBuffer {
    /// Create a buffer with the given configuration
    pub fn new(config: BufferConfig) -> Self {
        let capacity = config.capacity.max(1);

        Self {
            inner: Mutex::new(Inner {
                ring: vec![0u8; capacity].into_boxed_slice(),
                write_pos: 0,
                readers: HashMap::new(),
                next_reader_id: 1,
                closed: None,
            }),
            data_ready: Notify::new(),
            space_ready: Notify::new(),
            config,
        }
    }

    /// Create a buffer with the given capacity and default read/backpressure settings
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(BufferConfig::default().capacity(capacity))
    }

    /// Ring capacity in bytes
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Attach a reader at the current write position
    pub fn attach(&self) -> Result<ReaderId> {
        let mut inner = self.inner.lock();

        if inner.closed.is_some() {
            return Err(RelayError::BufferClosed);
        }

        let id = inner.next_reader_id;
        inner.next_reader_id += 1;
        let pos = inner.write_pos;
        inner.readers.insert(id, Cursor { pos, evicted: None });

        tracing::trace!(reader = id, offset = pos, "Reader attached");
        Ok(id)
    }

    /// Detach a reader; its unread bytes stop holding back the writer
    pub fn detach(&self, id: ReaderId) {
        let removed = self.inner.lock().readers.remove(&id).is_some();
        if removed {
            self.space_ready.notify_waiters();
            tracing::trace!(reader = id, "Reader detached");
        }
    }

    /// Write all of `data`, waiting for space as needed
    ///
    /// A chunk no larger than the ring lands in one piece, so the write
    /// position only ever rests on chunk boundaries and a reader attaching
    /// while the writer waits starts at the beginning of a chunk. Larger
    /// chunks stream through as space frees up.
    ///
    /// Returns `BufferClosed` if the buffer is closed before or during the
    /// write. Bytes accepted before the close stay readable only when the
    /// close reason drains.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut offset = 0;

        while offset < data.len() {
            let notified = {
                let mut inner = self.inner.lock();

                if inner.closed.is_some() {
                    return Err(RelayError::BufferClosed);
                }

                let cap = inner.ring.len();
                let remaining = data.len() - offset;
                let needed = if data.len() <= cap { remaining } else { 1 };

                let mut free = inner.free_space();
                if free < needed {
                    if let BackpressurePolicy::DropSlowReader { max_lag } = self.config.policy {
                        // Also drop readers too far behind for the chunk to fit
                        let threshold = max_lag.min(cap - needed + 1);
                        if inner.evict_lagging(threshold) > 0 {
                            self.data_ready.notify_waiters();
                            free = inner.free_space();
                        }
                    }
                }

                if free >= needed {
                    let n = free.min(remaining);
                    inner.copy_in(&data[offset..offset + n]);
                    offset += n;
                    drop(inner);
                    self.data_ready.notify_waiters();
                    continue;
                }

                // Registered before the lock is released so no wakeup is lost
                self.space_ready.notified()
            };

            notified.await;
        }

        Ok(())
    }

    /// Read up to `max_read` bytes for `id`
    ///
    /// Returns `Ok(None)` at end of stream once everything buffered has been
    /// consumed. Returns `BufferClosed` for a non-draining close or an unknown
    /// reader, and `Lagged` once for a reader the writer evicted.
    pub async fn read(&self, id: ReaderId) -> Result<Option<Bytes>> {
        loop {
            let notified = {
                let mut guard = self.inner.lock();
                let inner = &mut *guard;

                let cursor = match inner.readers.get_mut(&id) {
                    Some(cursor) => cursor,
                    None => return Err(RelayError::BufferClosed),
                };

                if let Some(lag) = cursor.evicted {
                    inner.readers.remove(&id);
                    return Err(RelayError::Lagged { lag });
                }

                match &inner.closed {
                    Some(reason) if !reason.drains() => return Err(RelayError::BufferClosed),
                    _ => {}
                }

                if cursor.pos < inner.write_pos {
                    let available = (inner.write_pos - cursor.pos) as usize;
                    let n = available.min(self.config.max_read);
                    let chunk = Inner::copy_out(&inner.ring, cursor.pos, n);
                    cursor.pos += n as u64;
                    drop(guard);
                    self.space_ready.notify_waiters();
                    return Ok(Some(chunk));
                }

                if inner.closed.is_some() {
                    return Ok(None);
                }

                self.data_ready.notified()
            };

            notified.await;
        }
    }

    /// Close the buffer and wake every waiter
    ///
    /// Idempotent: only the first reason is kept. Returns `true` if this call
    /// performed the close.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed.is_some() {
                return false;
            }
            tracing::debug!(reason = %reason, bytes = inner.write_pos, "Relay buffer closed");
            inner.closed = Some(reason);
        }

        self.data_ready.notify_waiters();
        self.space_ready.notify_waiters();
        true
    }

    /// Whether the buffer has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    /// Snapshot the buffer state
    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();

        BufferStats {
            capacity: inner.ring.len(),
            bytes_written: inner.write_pos,
            buffered: inner.buffered(),
            readers: inner.readers.values().filter(|c| c.evicted.is_none()).count(),
            closed: inner.closed.clone(),
        }
    }
}

impl std::fmt::Debug for RelayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBuffer")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn small(capacity: usize) -> Arc<RelayBuffer> {
        Arc::new(RelayBuffer::new(
            BufferConfig::default().capacity(capacity).max_read(capacity),
        ))
    }

    #[tokio::test]
    async fn test_reader_sees_bytes_in_order() {
        let buffer = small(64);
        let id = buffer.attach().unwrap();

        buffer.write(b"hello ").await.unwrap();
        buffer.write(b"world").await.unwrap();

        let chunk = buffer.read(id).await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello world");
    }

    #[tokio::test]
    async fn test_late_reader_joins_at_live_position() {
        let buffer = small(64);
        let early = buffer.attach().unwrap();

        buffer.write(b"b1").await.unwrap();
        let late = buffer.attach().unwrap();
        buffer.write(b"b2").await.unwrap();

        assert_eq!(&buffer.read(early).await.unwrap().unwrap()[..], b"b1b2");
        assert_eq!(&buffer.read(late).await.unwrap().unwrap()[..], b"b2");
    }

    #[tokio::test]
    async fn test_wraparound_preserves_bytes() {
        let buffer = small(8);
        let id = buffer.attach().unwrap();

        buffer.write(b"abcdef").await.unwrap();
        assert_eq!(&buffer.read(id).await.unwrap().unwrap()[..], b"abcdef");

        buffer.write(b"ghijkl").await.unwrap();
        assert_eq!(&buffer.read(id).await.unwrap().unwrap()[..], b"ghijkl");
    }

    #[tokio::test]
    async fn test_max_read_splits_chunks() {
        let buffer = Arc::new(RelayBuffer::new(
            BufferConfig::default().capacity(32).max_read(4),
        ));
        let id = buffer.attach().unwrap();

        buffer.write(b"0123456789").await.unwrap();

        assert_eq!(&buffer.read(id).await.unwrap().unwrap()[..], b"0123");
        assert_eq!(&buffer.read(id).await.unwrap().unwrap()[..], b"4567");
        assert_eq!(&buffer.read(id).await.unwrap().unwrap()[..], b"89");
    }

    #[tokio::test]
    async fn test_writer_blocks_when_full() {
        let buffer = small(4);
        let id = buffer.attach().unwrap();

        buffer.write(b"abcd").await.unwrap();

        let writer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.write(b"ef").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());
        assert_eq!(buffer.stats().buffered, 4);

        assert_eq!(&buffer.read(id).await.unwrap().unwrap()[..], b"abcd");
        writer.await.unwrap().unwrap();
        assert_eq!(&buffer.read(id).await.unwrap().unwrap()[..], b"ef");
    }

    #[tokio::test]
    async fn test_blocked_chunk_is_written_whole() {
        let buffer = small(400);
        let early = buffer.attach().unwrap();

        buffer.write(&[1u8; 188]).await.unwrap();
        buffer.write(&[2u8; 188]).await.unwrap();

        // 24 bytes free; the third chunk waits instead of landing partially
        let writer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.write(&[3u8; 188]).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());
        assert_eq!(buffer.stats().bytes_written, 376);

        let late = buffer.attach().unwrap();
        assert_eq!(buffer.read(early).await.unwrap().unwrap().len(), 376);
        writer.await.unwrap().unwrap();

        let chunk = buffer.read(late).await.unwrap().unwrap();
        assert_eq!(&chunk[..], &[3u8; 188][..]);
    }

    #[tokio::test]
    async fn test_write_larger_than_capacity_streams_through() {
        let buffer = small(4);
        let id = buffer.attach().unwrap();

        let writer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.write(b"0123456789").await })
        };

        let mut received = Vec::new();
        while received.len() < 10 {
            let chunk = buffer.read(id).await.unwrap().unwrap();
            received.extend_from_slice(&chunk);
        }

        writer.await.unwrap().unwrap();
        assert_eq!(received, b"0123456789");
    }

    #[tokio::test]
    async fn test_no_readers_does_not_block() {
        let buffer = small(4);

        buffer.write(b"0123456789").await.unwrap();
        assert_eq!(buffer.stats().bytes_written, 10);
        assert_eq!(buffer.stats().buffered, 0);
    }

    #[tokio::test]
    async fn test_detach_releases_writer() {
        let buffer = small(4);
        let fast = buffer.attach().unwrap();
        let slow = buffer.attach().unwrap();

        buffer.write(b"abcd").await.unwrap();
        buffer.read(fast).await.unwrap();

        let writer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.write(b"ef").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        buffer.detach(slow);
        writer.await.unwrap().unwrap();
        assert_eq!(&buffer.read(fast).await.unwrap().unwrap()[..], b"ef");
    }

    #[tokio::test]
    async fn test_end_of_stream_drains_then_eof() {
        let buffer = small(16);
        let id = buffer.attach().unwrap();

        buffer.write(b"tail").await.unwrap();
        assert!(buffer.close(CloseReason::EndOfStream));

        assert_eq!(&buffer.read(id).await.unwrap().unwrap()[..], b"tail");
        assert!(buffer.read(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_close_fails_reads_immediately() {
        let buffer = small(16);
        let id = buffer.attach().unwrap();

        buffer.write(b"unread").await.unwrap();
        buffer.close(CloseReason::ProducerFailed("boom".into()));

        assert!(matches!(buffer.read(id).await, Err(RelayError::BufferClosed)));
        assert!(matches!(
            buffer.write(b"more").await,
            Err(RelayError::BufferClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_reader_and_writer() {
        let buffer = small(2);
        let id = buffer.attach().unwrap();

        let reader = {
            let buffer = Arc::clone(&buffer);
            let other = buffer.attach().unwrap();
            tokio::spawn(async move { buffer.read(other).await })
        };
        buffer.write(b"xy").await.unwrap();
        let writer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.write(b"z").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.close(CloseReason::Stopped);

        assert!(matches!(writer.await.unwrap(), Err(RelayError::BufferClosed)));
        // Reader had data before the close; either outcome is a clean wakeup
        let _ = reader.await.unwrap();
        assert!(matches!(buffer.read(id).await, Err(RelayError::BufferClosed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let buffer = small(8);

        assert!(buffer.close(CloseReason::Stopped));
        assert!(!buffer.close(CloseReason::ProducerFailed("late".into())));
        assert_eq!(buffer.stats().closed, Some(CloseReason::Stopped));
        assert!(matches!(buffer.attach(), Err(RelayError::BufferClosed)));
    }

    #[tokio::test]
    async fn test_drop_slow_reader_evicts_when_chunk_cannot_fit() {
        let buffer = Arc::new(RelayBuffer::new(
            BufferConfig::default()
                .capacity(8)
                .max_read(8)
                .policy(BackpressurePolicy::DropSlowReader { max_lag: 8 }),
        ));
        let stuck = buffer.attach().unwrap();

        buffer.write(b"abcdef").await.unwrap();

        // Lag 6 is under max_lag, but a 4-byte chunk cannot fit behind it
        tokio::time::timeout(Duration::from_secs(1), buffer.write(b"ghij"))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            buffer.read(stuck).await,
            Err(RelayError::Lagged { lag: 6 })
        ));
        assert_eq!(buffer.stats().bytes_written, 10);
    }

    #[tokio::test]
    async fn test_drop_slow_reader_policy_evicts() {
        let buffer = Arc::new(RelayBuffer::new(
            BufferConfig::default()
                .capacity(4)
                .max_read(4)
                .policy(BackpressurePolicy::DropSlowReader { max_lag: 4 }),
        ));
        let fast = buffer.attach().unwrap();
        let slow = buffer.attach().unwrap();

        buffer.write(b"abcd").await.unwrap();
        assert_eq!(&buffer.read(fast).await.unwrap().unwrap()[..], b"abcd");

        // Ring is full because of `slow`; the writer evicts it instead of waiting
        tokio::time::timeout(Duration::from_secs(1), buffer.write(b"ef"))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            buffer.read(slow).await,
            Err(RelayError::Lagged { lag: 4 })
        ));
        assert_eq!(&buffer.read(fast).await.unwrap().unwrap()[..], b"ef");
        assert_eq!(buffer.stats().readers, 1);
    }
}
