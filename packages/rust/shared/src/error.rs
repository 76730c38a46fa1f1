//! Error types for Storyboard.
//!
//! Library crates use [`StoryboardError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Storyboard operations.
#[derive(Debug, thiserror::Error)]
pub enum StoryboardError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to the generation service.
    #[error("network error: {0}")]
    Network(String),

    /// Response or persisted-state parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Key-value store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// The generation service did not produce a usable scene.
    #[error("generation error: {0}")]
    Generation(String),

    /// A pipeline run aborted because scene `index` (0-based) failed.
    #[error("failed to generate scene {}: {reason}", index + 1)]
    SceneFailed { index: usize, reason: String },

    /// Scenes are missing authored fields.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Scene position outside the store.
    #[error("scene index {index} out of range (store holds {len} scenes)")]
    SceneIndex { index: usize, len: usize },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StoryboardError>;

impl StoryboardError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
