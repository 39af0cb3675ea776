//! # Wire Codecs
//!
//! Stateless transforms from relay messages to outbound bytes.

/// Server-Sent Events framing.
pub mod sse;

pub use sse::SseEncoder;
