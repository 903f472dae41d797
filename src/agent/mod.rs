//! Simulated position sources
//!
//! Movement is a trivial random walk; the interesting work happens in
//! [`crate::session`] and [`crate::fleet`].

pub mod drone;

pub use drone::{Agent, DEFAULT_START, STEP_DEGREES};
