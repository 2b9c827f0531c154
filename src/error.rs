//! Error types
//!
//! Every failure inside the pipeline is non-fatal and only logged. The one
//! exception is format construction during `initialize`, which is returned to
//! the caller because no pipeline can exist without valid formats.

use thiserror::Error;

/// Audio subsystem errors
#[derive(Debug, Error)]
pub enum AudioError {
    /// Invalid sample rate / channel layout
    #[error("invalid audio format: {0}")]
    FormatConstruction(String),

    /// A platform session configuration step failed
    #[error("session configuration failed ({step}): {reason}")]
    SessionConfiguration {
        step: &'static str,
        reason: String,
    },

    /// The processing graph refused to start
    #[error("audio graph failed to start: {0}")]
    GraphStart(String),

    /// Playback bytes that cannot form a buffer
    #[error("malformed playback input: {0}")]
    MalformedPlayback(String),

    /// Capability not available on this backend
    #[error("unsupported on this backend: {0}")]
    Unsupported(&'static str),

    /// Any other backend failure
    #[error("audio backend error: {0}")]
    Backend(String),
}

impl AudioError {
    pub fn session(step: &'static str, reason: impl Into<String>) -> Self {
        Self::SessionConfiguration {
            step,
            reason: reason.into(),
        }
    }
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
