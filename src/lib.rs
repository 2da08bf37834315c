//! In-memory HTTP restreamer for live HLS sources
//!
//! Each configured stream is pulled by one upstream producer, however many
//! HTTP clients watch it. The producer starts with the first client, feeds a
//! bounded fan-out buffer, and stops when the last client leaves.
//!
//! ```text
//!  GET /{name} ──► SessionRegistry ──► StreamSession ──► ProducerSource
//!       ▲                                   │
//!       └──────── SubscriberHandle ◄── RelayBuffer ◄── ProducerStream
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hls_relay::{
//!     ProducerOptions, RegistryConfig, RelayServer, ServerConfig, SessionRegistry,
//!     StreamDefinition, StreamlinkSource,
//! };
//!
//! # async fn run() -> hls_relay::Result<()> {
//! let definitions = vec![StreamDefinition::new("nasatv", "https://example.com/live.m3u8")?];
//! let registry = SessionRegistry::new(
//!     definitions,
//!     Arc::new(StreamlinkSource::new()),
//!     ProducerOptions::default(),
//!     RegistryConfig::default(),
//! );
//!
//! let server = RelayServer::new(ServerConfig::default(), registry);
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod producer;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use buffer::{BackpressurePolicy, BufferConfig, CloseReason, RelayBuffer};
pub use config::{AppConfig, ConfigError};
pub use error::{RelayError, Result};
pub use producer::{
    ChannelFeed, ChannelSource, ProducerError, ProducerOptions, ProducerSource, ProducerStream,
    StreamlinkSource,
};
pub use registry::{RegistryConfig, SessionRegistry, StreamDefinition};
pub use server::{RelayServer, ServerConfig};
pub use session::{ProducerState, StreamSession, SubscriberHandle};
pub use stats::{RegistryStats, SessionStats};
