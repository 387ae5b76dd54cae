// src/core/protocol/mod.rs

pub mod envelope;
pub mod line_codec;
pub use envelope::{ResponseBody, ResponseEnvelope, ServerStatus, timestamp_now};
pub use line_codec::LineCodec;
