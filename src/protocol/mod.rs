//! Position report types, wire codec and topic rules
//!
//! Everything here is pure and transport-agnostic.

pub mod codec;
pub mod report;
pub mod topics;

pub use codec::{
    decode, decode_any, encode, CodecError, LegacyJsonPayload, PayloadFormat, FRAME_VERSION,
    MAX_AGENT_ID_LEN,
};
pub use report::*;
pub use topics::*;
