//! MPEG-TS packet alignment
//!
//! Downloaders hand out reads of arbitrary length. Clients joining mid-stream
//! resynchronise faster when every chunk starts on a packet boundary, so the
//! partial packet at the end of a read is carried into the next one.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::{ProducerError, ProducerStream};

/// MPEG-TS packet size in bytes
pub const TS_PACKET_SIZE: usize = 188;

/// Re-chunks a byte stream on 188-byte boundaries
#[derive(Debug, Default)]
pub struct TsAligner {
    carry: BytesMut,
}

impl TsAligner {
    /// Create an empty aligner
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the aligned prefix, if any
    pub fn push(&mut self, chunk: Bytes) -> Option<Bytes> {
        if self.carry.is_empty() {
            let aligned = chunk.len() - chunk.len() % TS_PACKET_SIZE;
            self.carry.extend_from_slice(&chunk[aligned..]);
            return (aligned > 0).then(|| chunk.slice(..aligned));
        }

        self.carry.extend_from_slice(&chunk);
        let aligned = self.carry.len() - self.carry.len() % TS_PACKET_SIZE;
        (aligned > 0).then(|| self.carry.split_to(aligned).freeze())
    }

    /// Bytes held back waiting for the rest of their packet
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Flush the trailing partial packet at end of stream
    pub fn finish(&mut self) -> Option<Bytes> {
        (!self.carry.is_empty()).then(|| self.carry.split().freeze())
    }
}

/// Producer stream wrapper that emits packet-aligned chunks
pub struct AlignedStream {
    inner: Box<dyn ProducerStream>,
    aligner: TsAligner,
    finished: bool,
}

impl AlignedStream {
    /// Wrap a running producer
    pub fn new(inner: Box<dyn ProducerStream>) -> Self {
        Self {
            inner,
            aligner: TsAligner::new(),
            finished: false,
        }
    }
}

#[async_trait]
impl ProducerStream for AlignedStream {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ProducerError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            match self.inner.read_chunk().await? {
                Some(chunk) => {
                    if let Some(aligned) = self.aligner.push(chunk) {
                        return Ok(Some(aligned));
                    }
                }
                None => {
                    self.finished = true;
                    return Ok(self.aligner.finish());
                }
            }
        }
    }

    async fn stop(&mut self) -> Result<(), ProducerError> {
        self.inner.stop().await
    }
}
