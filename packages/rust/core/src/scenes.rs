//! Ordered, persisted scene list.
//!
//! Every mutation writes the whole list back to the key-value store under
//! [`SCENES_KEY`] before returning. The list is never empty: it starts with
//! one blank scene and removing the last scene puts a blank one back.

use tracing::{debug, instrument};

use storyboard_shared::{Result, Scene, StoryboardError};
use storyboard_storage::{KeyValueStore, SCENES_KEY};

/// The user's storyboard, in narrative order.
#[derive(Debug)]
pub struct SceneStore<S> {
    kv: S,
    scenes: Vec<Scene>,
}

#[allow(clippy::len_without_is_empty)] // never empty
impl<S: KeyValueStore> SceneStore<S> {
    /// Restore the list from `kv`, or seed a single blank scene if nothing is stored.
    ///
    /// The seed is not written back until the first mutation.
    #[instrument(skip_all)]
    pub async fn load(kv: S) -> Result<Self> {
        let scenes = match kv.get(SCENES_KEY).await? {
            Some(json) => {
                let scenes: Vec<Scene> = serde_json::from_str(&json).map_err(|e| {
                    StoryboardError::parse(format!("stored scene list is not valid JSON: {e}"))
                })?;
                debug!(count = scenes.len(), "restored scenes");
                scenes
            }
            None => {
                debug!("no stored scenes, seeding one blank scene");
                Vec::new()
            }
        };

        let mut store = Self { kv, scenes };
        store.ensure_seeded();
        Ok(store)
    }

    /// All scenes in order.
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn get(&self, index: usize) -> Option<&Scene> {
        self.scenes.get(index)
    }

    /// Insert `scene` so that it ends up at `index` (`index == len` appends).
    pub async fn insert(&mut self, index: usize, scene: Scene) -> Result<()> {
        if index > self.scenes.len() {
            return Err(self.out_of_range(index));
        }
        let mut next = self.scenes.clone();
        next.insert(index, scene);
        self.commit(next).await
    }

    /// Insert a blank scene at `index`.
    pub async fn insert_empty(&mut self, index: usize) -> Result<()> {
        self.insert(index, Scene::default()).await
    }

    /// Replace the scene at `index`.
    pub async fn update(&mut self, index: usize, scene: Scene) -> Result<()> {
        if index >= self.scenes.len() {
            return Err(self.out_of_range(index));
        }
        let mut next = self.scenes.clone();
        next[index] = scene;
        self.commit(next).await
    }

    /// Remove and return the scene at `index`.
    pub async fn remove(&mut self, index: usize) -> Result<Scene> {
        if index >= self.scenes.len() {
            return Err(self.out_of_range(index));
        }
        let mut next = self.scenes.clone();
        let removed = next.remove(index);
        if next.is_empty() {
            next.push(Scene::default());
        }
        self.commit(next).await?;
        Ok(removed)
    }

    /// Drop every scene and forget the stored list.
    pub async fn reset(&mut self) -> Result<()> {
        self.kv.remove(SCENES_KEY).await?;
        self.scenes = vec![Scene::default()];
        Ok(())
    }

    fn ensure_seeded(&mut self) {
        if self.scenes.is_empty() {
            self.scenes.push(Scene::default());
        }
    }

    fn out_of_range(&self, index: usize) -> StoryboardError {
        StoryboardError::SceneIndex {
            index,
            len: self.scenes.len(),
        }
    }

    /// Write `next` to the store, then adopt it. A failed write leaves the
    /// in-memory list as it was.
    async fn commit(&mut self, next: Vec<Scene>) -> Result<()> {
        let json = serde_json::to_string(&next)
            .map_err(|e| StoryboardError::Storage(format!("failed to serialize scenes: {e}")))?;
        self.kv.set(SCENES_KEY, &json).await?;
        self.scenes = next;
        Ok(())
    }
}
