//! Error types for the shell core.
//!
//! Errors fall into four groups. Benign races (the compositor already tore
//! the window down) are swallowed by callers after a `debug!`. Client
//! misbehaviour is handled by policy and never surfaces as an error.
//! Keymap and configuration failures are logged where they are applied.
//! An unsupported buffer capability is a hard failure for that bind.

use std::time::Duration;
use thiserror::Error;

use crate::window::WindowId;

#[derive(Error, Debug)]
pub enum ShellError {
    /// The compositor no longer knows this window
    #[error("window {0} not found")]
    WindowNotFound(WindowId),

    /// `bind()` was called on a texture that holds no buffer
    #[error("bind called without any buffer")]
    NoBuffer,

    /// The native buffer offers neither a direct texture nor a texture source
    #[error("buffer does not support GL rendering")]
    UnsupportedBuffer,

    /// The compositor rejected a keymap
    #[error("keymap could not be applied: {0}")]
    Keymap(String),

    /// A keymap string that cannot be split into layout and variant
    #[error("invalid keymap '{0}'")]
    InvalidKeymap(String),

    /// The UI thread did not acknowledge a blocking handoff in time
    #[error("UI thread did not answer within {0:?}")]
    HandoffTimedOut(Duration),

    /// The UI thread's queue is closed
    #[error("UI thread is gone")]
    UiThreadGone,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ShellError {
    /// Failures caused by the shell operating on a window the compositor has
    /// already torn down
    pub fn is_benign_race(&self) -> bool {
        matches!(self, ShellError::WindowNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;
