//! Per-agent connection lifecycle
//!
//! Pure pieces (`backoff`, `queue`, `state`) hold the rules; [`Session`]
//! applies them to a transport.

pub mod backoff;
pub mod queue;
#[allow(clippy::module_inception)]
pub mod session;
pub mod state;

pub use backoff::BackoffPolicy;
pub use queue::{FrameQueue, QueuedFrame};
pub use session::{Session, SessionConfig, SessionSnapshot, SessionStats, DEFAULT_QUEUE_CAPACITY};
pub use state::{SessionState, SessionStateKind};
