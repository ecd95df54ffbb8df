//! Dialect-to-dialect translation.
//!
//! Request transforms are total functions; stream transforms are
//! incremental `(event, state) -> Vec<out>` steps where the caller owns
//! the read loop and cancellation.

pub mod claude2gemini;
pub mod gemini2claude;
pub mod openai2claude;
pub mod usage;

use std::fmt;

pub const DEFAULT_MAX_TOKENS: i64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    Unsupported(&'static str),
    InvalidPayload(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::Unsupported(what) => write!(f, "unsupported transform: {what}"),
            TransformError::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
        }
    }
}

impl std::error::Error for TransformError {}
