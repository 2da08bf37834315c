//! Stream sessions
//!
//! A session ties one producer run to the subscribers reading it:
//!
//! ```text
//!   ProducerStream ──pump──► RelayBuffer ──► SubscriberHandle ──► HTTP body
//!                                       └──► SubscriberHandle ──► HTTP body
//! ```

pub mod state;
pub mod stream;
pub mod subscriber;

pub use state::{ProducerState, SessionState};
pub use stream::StreamSession;
pub use subscriber::SubscriberHandle;
