//! Sequential scene-generation pipeline: validate → generate each scene → export.
//!
//! Scenes are generated strictly one after another because each call's
//! context is built from every earlier scene's output. The first failure ends
//! the run; scenes already generated stay written to the store and nothing is
//! exported.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{Span, field, info, instrument, warn};

use storyboard_shared::{Result, RunId, Scene, StoryboardError};
use storyboard_storage::KeyValueStore;

use crate::context::Context;
use crate::export::{ExportSink, export_filename, format_screenplay};
use crate::generation::SceneGenerator;
use crate::scenes::SceneStore;

/// Where the pipeline is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    /// Generating the scene at `index` (0-based).
    Running { index: usize },
    /// Stopped because the scene at `index` could not be generated or saved.
    Aborted { index: usize },
    Completed,
}

/// Snapshot emitted on every state transition.
#[derive(Debug, Clone, Copy)]
pub struct PipelineEvent<'a> {
    pub state: PipelineState,
    /// Scene currently being worked on; equals `total` once every scene is done.
    pub index: usize,
    pub total: usize,
    /// Most recent successfully generated scene in this run.
    pub last_completed: Option<&'a Scene>,
}

/// Receives pipeline transitions, e.g. to drive a progress display.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent<'_>);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn on_event(&self, _event: &PipelineEvent<'_>) {}
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    /// Number of scenes generated and exported.
    pub scene_count: usize,
    /// Name the screenplay was delivered under.
    pub export_filename: String,
    pub elapsed: Duration,
}

/// Drives one [`SceneGenerator`] over a [`SceneStore`] and hands the result
/// to an [`ExportSink`].
pub struct Pipeline<G, E> {
    generator: G,
    sink: E,
    state: PipelineState,
    last_completed: Option<Scene>,
}

impl<G: SceneGenerator, E: ExportSink> Pipeline<G, E> {
    pub fn new(generator: G, sink: E) -> Self {
        Self {
            generator,
            sink,
            state: PipelineState::Idle,
            last_completed: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn last_completed(&self) -> Option<&Scene> {
        self.last_completed.as_ref()
    }

    /// Generate every scene in `store`, in order, then export the screenplay.
    ///
    /// Holding `store` mutably for the whole run keeps user edits out while
    /// scenes are being written back. Each call starts over from the first
    /// scene with an empty context, whatever the previous run reached.
    ///
    /// # Errors
    ///
    /// - [`StoryboardError::Validation`] if any scene lacks a name or
    ///   description; nothing is generated.
    /// - [`StoryboardError::SceneFailed`] if the generator fails; earlier
    ///   scenes keep their generated text and nothing is exported.
    /// - Storage or export errors from the collaborators, unchanged.
    #[instrument(skip_all, fields(run_id = field::Empty, scenes = store.len()))]
    pub async fn run<S: KeyValueStore>(
        &mut self,
        store: &mut SceneStore<S>,
        observer: &dyn PipelineObserver,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let run_id = RunId::new();
        Span::current().record("run_id", field::display(&run_id));

        let total = store.len();
        self.last_completed = None;

        self.transition(PipelineState::Validating, 0, total, observer);
        if let Err(e) = validate_scenes(store.scenes()) {
            warn!(error = %e, "scene validation failed");
            self.transition(PipelineState::Idle, 0, total, observer);
            return Err(e);
        }

        info!(%run_id, total, "starting generation run");
        let mut context = Context::initial();

        for index in 0..total {
            self.transition(PipelineState::Running { index }, index, total, observer);

            if index + 1 == total {
                context = context.mark_final();
            }

            let scene = store.scenes()[index].clone();
            let generated = match self.generator.generate(&scene, &context).await {
                Ok(generated) => generated,
                Err(e) => {
                    warn!(index, scene = %scene.name, error = %e, "scene generation failed, aborting run");
                    self.transition(PipelineState::Aborted { index }, index, total, observer);
                    return Err(StoryboardError::SceneFailed {
                        index,
                        reason: e.to_string(),
                    });
                }
            };

            if let Err(e) = store.update(index, generated.clone()).await {
                self.transition(PipelineState::Aborted { index }, index, total, observer);
                return Err(e);
            }

            context = context.advance(&generated);
            info!(index, scene = %generated.name, "scene complete");
            self.last_completed = Some(generated);
        }

        self.transition(PipelineState::Completed, total, total, observer);

        let text = format_screenplay(store.scenes());
        let filename = export_filename(Utc::now());
        let delivered = self.sink.deliver(&text, &filename);
        self.transition(PipelineState::Idle, total, total, observer);
        delivered?;

        let report = RunReport {
            run_id,
            scene_count: total,
            export_filename: filename,
            elapsed: start.elapsed(),
        };

        info!(
            run_id = %report.run_id,
            scene_count = report.scene_count,
            file = %report.export_filename,
            elapsed_ms = report.elapsed.as_millis(),
            "generation run complete"
        );

        Ok(report)
    }

    fn transition(
        &mut self,
        state: PipelineState,
        index: usize,
        total: usize,
        observer: &dyn PipelineObserver,
    ) {
        self.state = state;
        observer.on_event(&PipelineEvent {
            state,
            index,
            total,
            last_completed: self.last_completed.as_ref(),
        });
    }
}

/// Every scene needs a name and a description before anything is generated.
///
/// [`Pipeline::run`] checks this itself; callers may check earlier to report
/// incomplete scenes before other setup errors.
pub fn validate_scenes(scenes: &[Scene]) -> Result<()> {
    if scenes.iter().all(Scene::is_complete) {
        Ok(())
    } else {
        Err(StoryboardError::validation(
            "please fill in the name and description for every scene",
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::context::{CONTEXT_WINDOW_CHARS, FINAL_SCENE_MARKER};
    use storyboard_storage::{MemoryStore, SCENES_KEY};

    /// Generator that echoes the scene name and can be told to fail at one index.
    #[derive(Default)]
    struct ScriptedGenerator {
        fail_at: Option<usize>,
        output_len: usize,
        calls: Mutex<Vec<(Scene, Context)>>,
    }

    impl ScriptedGenerator {
        fn failing_at(index: usize) -> Self {
            Self {
                fail_at: Some(index),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(Scene, Context)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SceneGenerator for ScriptedGenerator {
        async fn generate(&self, scene: &Scene, context: &Context) -> Result<Scene> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push((scene.clone(), context.clone()));
            if self.fail_at == Some(index) {
                return Err(StoryboardError::Generation("service unavailable".into()));
            }
            let padding = "x".repeat(self.output_len);
            Ok(Scene {
                name: scene.name.clone(),
                description: scene.description.clone(),
                summary: format!("summary of {}{padding}", scene.name),
                script: format!("script of {}{padding}", scene.name),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        deliveries: Mutex<Vec<(String, String)>>,
    }

    impl ExportSink for RecordingSink {
        fn deliver(&self, text: &str, filename: &str) -> Result<()> {
            self.deliveries
                .lock()
                .unwrap()
                .push((text.to_string(), filename.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<(PipelineState, usize, usize, Option<String>)>>,
    }

    impl PipelineObserver for RecordingObserver {
        fn on_event(&self, event: &PipelineEvent<'_>) {
            self.events.lock().unwrap().push((
                event.state,
                event.index,
                event.total,
                event.last_completed.map(|s| s.name.clone()),
            ));
        }
    }

    /// Reads fine, refuses every write.
    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key).await
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(StoryboardError::Storage("disk full".into()))
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Err(StoryboardError::Storage("disk full".into()))
        }
    }

    async fn store_with<'a>(kv: &'a MemoryStore, scenes: &[Scene]) -> SceneStore<&'a MemoryStore> {
        kv.set(SCENES_KEY, &serde_json::to_string(scenes).unwrap())
            .await
            .unwrap();
        SceneStore::load(kv).await.unwrap()
    }

    fn abc() -> Vec<Scene> {
        vec![
            Scene::authored("A", "first"),
            Scene::authored("B", "second"),
            Scene::authored("C", "third"),
        ]
    }

    #[test]
    fn validate_scenes_requires_name_and_description() {
        assert!(validate_scenes(&abc()).is_ok());
        assert!(validate_scenes(&[Scene::default()]).is_err());
        let err = validate_scenes(&[Scene::authored("A", "")]).unwrap_err();
        assert!(matches!(err, StoryboardError::Validation { .. }));
    }

    #[tokio::test]
    async fn validation_failure_blocks_the_run() {
        let kv = MemoryStore::new();
        let mut store = store_with(&kv, &[Scene::authored("A", "d"), Scene::authored("", "d2")]).await;
        let generator = ScriptedGenerator::default();
        let sink = RecordingSink::default();
        let observer = RecordingObserver::default();
        let mut pipeline = Pipeline::new(&generator, &sink);

        let err = pipeline.run(&mut store, &observer).await.unwrap_err();

        assert!(matches!(err, StoryboardError::Validation { .. }));
        assert!(generator.calls().is_empty());
        assert!(sink.deliveries.lock().unwrap().is_empty());
        assert_eq!(pipeline.state(), PipelineState::Idle);
        let states: Vec<_> = observer.events.lock().unwrap().iter().map(|e| e.0).collect();
        assert_eq!(states, [PipelineState::Validating, PipelineState::Idle]);
    }

    #[tokio::test]
    async fn missing_description_anywhere_blocks_the_run() {
        let kv = MemoryStore::new();
        let mut scenes = abc();
        scenes[2].description.clear();
        let mut store = store_with(&kv, &scenes).await;
        let generator = ScriptedGenerator::default();
        let mut pipeline = Pipeline::new(&generator, RecordingSink::default());

        assert!(pipeline.run(&mut store, &SilentObserver).await.is_err());
        assert!(generator.calls().is_empty());
        assert_eq!(store.scenes(), scenes.as_slice());
    }

    #[tokio::test]
    async fn successful_run_writes_back_and_exports() {
        let kv = MemoryStore::new();
        let mut store = store_with(&kv, &abc()).await;
        let generator = ScriptedGenerator::default();
        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::new(&generator, &sink);

        let report = pipeline.run(&mut store, &SilentObserver).await.unwrap();

        assert_eq!(report.scene_count, 3);
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.last_completed().unwrap().name, "C");
        for (scene, name) in store.scenes().iter().zip(["A", "B", "C"]) {
            assert_eq!(scene.summary, format!("summary of {name}"));
            assert_eq!(scene.script, format!("script of {name}"));
        }

        let persisted: Vec<Scene> =
            serde_json::from_str(&kv.get(SCENES_KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(persisted, store.scenes());

        let deliveries = sink.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        let (text, filename) = &deliveries[0];
        assert_eq!(text, &format_screenplay(store.scenes()));
        assert_eq!(filename, &report.export_filename);
        assert!(filename.starts_with("storyboard-ai-"));
        assert!(filename.ends_with("Z.txt"));
    }

    #[tokio::test]
    async fn abort_keeps_earlier_results_and_skips_export() {
        let kv = MemoryStore::new();
        let mut store = store_with(&kv, &abc()).await;
        let generator = ScriptedGenerator::failing_at(1);
        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::new(&generator, &sink);

        let err = pipeline.run(&mut store, &SilentObserver).await.unwrap_err();

        assert!(matches!(err, StoryboardError::SceneFailed { index: 1, .. }));
        assert!(err.to_string().contains("scene 2"));
        assert_eq!(pipeline.state(), PipelineState::Aborted { index: 1 });
        assert_eq!(generator.calls().len(), 2, "no scene after the failure is attempted");

        let original = abc();
        assert_eq!(store.scenes()[0].summary, "summary of A");
        assert_eq!(store.scenes()[1], original[1]);
        assert_eq!(store.scenes()[2], original[2]);

        let persisted: Vec<Scene> =
            serde_json::from_str(&kv.get(SCENES_KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(persisted, store.scenes());
        assert!(sink.deliveries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn final_scene_context_carries_marker() {
        let kv = MemoryStore::new();
        let mut store = store_with(&kv, &abc()[..2]).await;
        let generator = ScriptedGenerator::default();
        let mut pipeline = Pipeline::new(&generator, RecordingSink::default());

        pipeline.run(&mut store, &SilentObserver).await.unwrap();

        let calls = generator.calls();
        assert_eq!(calls[0].1, Context::initial());
        let after_first = Context::initial().advance(&store.scenes()[0]);
        assert_eq!(
            calls[1].1.summary,
            format!("{}{FINAL_SCENE_MARKER}", after_first.summary)
        );
        assert_eq!(calls[1].1.script, after_first.script);
    }

    #[tokio::test]
    async fn single_scene_is_marked_final() {
        let kv = MemoryStore::new();
        let mut store = store_with(&kv, &abc()[..1]).await;
        let generator = ScriptedGenerator::default();
        let mut pipeline = Pipeline::new(&generator, RecordingSink::default());

        pipeline.run(&mut store, &SilentObserver).await.unwrap();

        assert_eq!(generator.calls()[0].1.summary, FINAL_SCENE_MARKER);
    }

    #[tokio::test]
    async fn context_stays_bounded_over_long_outputs() {
        let kv = MemoryStore::new();
        let scenes: Vec<Scene> = (0..8)
            .map(|i| Scene::authored(format!("S{i}"), "d"))
            .collect();
        let mut store = store_with(&kv, &scenes).await;
        let generator = ScriptedGenerator {
            output_len: 1500,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(&generator, RecordingSink::default());

        pipeline.run(&mut store, &SilentObserver).await.unwrap();

        let calls = generator.calls();
        for (i, (_, ctx)) in calls.iter().enumerate() {
            let budget = if i + 1 == calls.len() {
                CONTEXT_WINDOW_CHARS + FINAL_SCENE_MARKER.chars().count()
            } else {
                CONTEXT_WINDOW_CHARS
            };
            assert!(ctx.summary.chars().count() <= budget, "call {i}");
            assert!(ctx.script.chars().count() <= CONTEXT_WINDOW_CHARS, "call {i}");
        }
        // Oldest scenes have scrolled out of the window.
        assert!(!calls[7].1.script.contains("script of S0"));
        assert!(calls[7].1.script.contains("script of S6"));
    }

    #[tokio::test]
    async fn progress_events_follow_the_state_machine() {
        let kv = MemoryStore::new();
        let mut store = store_with(&kv, &abc()[..2]).await;
        let generator = ScriptedGenerator::default();
        let observer = RecordingObserver::default();
        let mut pipeline = Pipeline::new(&generator, RecordingSink::default());

        pipeline.run(&mut store, &observer).await.unwrap();

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (PipelineState::Validating, 0, 2, None),
                (PipelineState::Running { index: 0 }, 0, 2, None),
                (PipelineState::Running { index: 1 }, 1, 2, Some("A".to_string())),
                (PipelineState::Completed, 2, 2, Some("B".to_string())),
                (PipelineState::Idle, 2, 2, Some("B".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn abort_is_reported_to_observer() {
        let kv = MemoryStore::new();
        let mut store = store_with(&kv, &abc()).await;
        let generator = ScriptedGenerator::failing_at(0);
        let observer = RecordingObserver::default();
        let mut pipeline = Pipeline::new(&generator, RecordingSink::default());

        let _ = pipeline.run(&mut store, &observer).await;

        let events = observer.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.0, PipelineState::Aborted { index: 0 });
        assert_eq!(last.3, None);
    }

    #[tokio::test]
    async fn rerun_regenerates_everything_from_a_fresh_context() {
        let kv = MemoryStore::new();
        let mut store = store_with(&kv, &abc()).await;

        let failing = ScriptedGenerator::failing_at(2);
        let mut pipeline = Pipeline::new(&failing, RecordingSink::default());
        assert!(pipeline.run(&mut store, &SilentObserver).await.is_err());

        let generator = ScriptedGenerator::default();
        let mut pipeline = Pipeline::new(&generator, RecordingSink::default());
        pipeline.run(&mut store, &SilentObserver).await.unwrap();

        let calls = generator.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1, Context::initial());
        // The already-generated scene is resubmitted with its stale output.
        assert_eq!(calls[0].0.summary, "summary of A");
    }

    #[tokio::test]
    async fn storage_failure_aborts_without_export() {
        let kv = ReadOnlyStore(MemoryStore::new());
        kv.0.set(SCENES_KEY, &serde_json::to_string(&abc()).unwrap())
            .await
            .unwrap();
        let mut store = SceneStore::load(kv).await.unwrap();
        let generator = ScriptedGenerator::default();
        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::new(&generator, &sink);

        let err = pipeline.run(&mut store, &SilentObserver).await.unwrap_err();

        assert!(matches!(err, StoryboardError::Storage(_)));
        assert_eq!(pipeline.state(), PipelineState::Aborted { index: 0 });
        assert_eq!(generator.calls().len(), 1);
        assert!(sink.deliveries.lock().unwrap().is_empty());
        // The unsaved scene is not kept in memory either.
        assert_eq!(store.scenes(), abc().as_slice());
        assert!(pipeline.last_completed().is_none());
    }
}
