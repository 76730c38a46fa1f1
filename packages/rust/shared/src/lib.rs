//! Shared types, error model, and configuration for Storyboard.
//!
//! This crate is the foundation depended on by all other Storyboard crates.
//! It provides:
//! - [`StoryboardError`], the unified error type
//! - Domain types ([`Scene`], [`RunId`])
//! - Configuration ([`AppConfig`], [`OpenAiModel`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ExportConfig, OpenAiConfig, OpenAiModel, StorageConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{Result, StoryboardError};
pub use types::{RunId, Scene};
