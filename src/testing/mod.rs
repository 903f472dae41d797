//! Testing utilities and mock implementations
//!
//! Lets sessions, the scheduler and the supervisor run without a broker.

pub mod mocks;

pub use mocks::*;
