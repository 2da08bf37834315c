//! Bounded relay buffer
//!
//! Decouples one producer from N HTTP subscribers. The producer writes into a
//! fixed-size ring; each subscriber holds its own cursor.
//!
//! ```text
//!   producer ──write()──►  ┌──────────────── ring ────────────────┐
//!                          │ ... [slowest cursor] ... [write pos] │
//!                          └──────────────────────────────────────┘
//!                                 ▲                  ▲
//!                            reader A            reader B (joined later)
//! ```
//!
//! The writer never overwrites bytes an attached reader has not consumed.
//! With the default `Block` policy a full ring parks the writer until the
//! slowest reader catches up or detaches.

pub mod config;
pub mod reader;
pub mod relay;

pub use config::{BackpressurePolicy, BufferConfig, DEFAULT_CAPACITY};
pub use reader::BufferReader;
pub use relay::{BufferStats, CloseReason, ReaderId, RelayBuffer};
