//! Upstream byte producers
//!
//! The relay engine never looks inside the media. A producer is anything that
//! can be started for a source URL and then yields an opaque byte stream:
//!
//! - [`StreamlinkSource`] drives the external `streamlink` downloader as a
//!   child process and reads its stdout.
//! - [`ChannelSource`] is fed in-process through [`ChannelFeed`] handles.
//!
//! [`AlignedStream`] wraps any stream so emitted chunks end on MPEG-TS packet
//! boundaries.

pub mod channel;
pub mod options;
pub mod streamlink;
pub mod ts;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use channel::{ChannelFeed, ChannelSource, FeedReceiver};
pub use options::ProducerOptions;
pub use streamlink::StreamlinkSource;
pub use ts::{AlignedStream, TsAligner, TS_PACKET_SIZE};

/// Error type for producer operations
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The producer could not be started
    #[error("{0}")]
    Start(String),

    /// No data arrived within the start timeout
    #[error("no data within {0:?}")]
    Timeout(std::time::Duration),

    /// The producer failed while streaming
    #[error("{0}")]
    Failed(String),

    /// I/O error talking to the producer
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts producers for a source URL
#[async_trait]
pub trait ProducerSource: Send + Sync + 'static {
    /// Start producing bytes for `url`
    async fn start(
        &self,
        url: &str,
        options: &ProducerOptions,
    ) -> Result<Box<dyn ProducerStream>, ProducerError>;
}

/// A running producer
#[async_trait]
pub trait ProducerStream: Send {
    /// Next chunk of bytes; `Ok(None)` signals end of stream
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ProducerError>;

    /// Ask the producer to stop and release its resources
    async fn stop(&mut self) -> Result<(), ProducerError>;
}
