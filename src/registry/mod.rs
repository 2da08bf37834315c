//! Session registry
//!
//! The registry maps stream names to live sessions and creates them on
//! demand from the configured stream definitions.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SessionRegistry>
//!                  ┌───────────────────────────────┐
//!                  │ definitions: name → StreamDef │
//!                  │ sessions: HashMap<name,       │
//!                  │   Arc<StreamSession> {        │
//!                  │     buffer: RelayBuffer,      │
//!                  │     pump task,                │
//!                  │   }                           │
//!                  │ >                             │
//!                  └───────────────┬───────────────┘
//!                                  │
//!          ┌───────────────────────┼───────────────────────┐
//!          │                       │                       │
//!          ▼                       ▼                       ▼
//!     [Producer]             [Subscriber]            [Subscriber]
//!     read_chunk()           handle.read()           handle.read()
//!          │                       │                       │
//!          └──► buffer.write() ──► HTTP body ─────────► client
//! ```
//!
//! # Zero-Copy Design
//!
//! Chunks handed to subscribers are `bytes::Bytes` slices. Contiguous ring
//! regions are copied once out of the ring per read, never per byte.

pub mod config;
pub mod definition;
pub mod store;

pub use config::RegistryConfig;
pub use definition::{validate_stream_name, StreamDefinition, DEFAULT_CONTENT_TYPE};
pub use store::SessionRegistry;
