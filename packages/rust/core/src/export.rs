//! Plain-text screenplay export.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use storyboard_shared::{Result, Scene, StoryboardError};

/// Receives a finished screenplay.
pub trait ExportSink {
    fn deliver(&self, text: &str, filename: &str) -> Result<()>;
}

impl<T: ExportSink + ?Sized> ExportSink for &T {
    fn deliver(&self, text: &str, filename: &str) -> Result<()> {
        (**self).deliver(text, filename)
    }
}

/// Render every scene, in order, as one fixed-layout text document.
pub fn format_screenplay(scenes: &[Scene]) -> String {
    scenes.iter().map(format_scene).collect()
}

fn format_scene(scene: &Scene) -> String {
    format!(
        "Scene Name:\n{}\n\nScene Description:\n{}\n\nScene Summary:\n{}\n\nScene Script:\n{}\n\n\n",
        scene.name, scene.description, scene.summary, scene.script
    )
}

/// `storyboard-ai-<ISO 8601 UTC, millisecond precision>.txt`
pub fn export_filename(at: DateTime<Utc>) -> String {
    format!(
        "storyboard-ai-{}.txt",
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Writes exports as files into a directory, creating it when missing.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where `filename` ends up once delivered.
    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }
}

impl ExportSink for DirectorySink {
    fn deliver(&self, text: &str, filename: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StoryboardError::io(&self.dir, e))?;
        let path = self.path_for(filename);
        std::fs::write(&path, text).map_err(|e| StoryboardError::io(&path, e))?;
        info!(?path, bytes = text.len(), "screenplay exported");
        Ok(())
    }
}
