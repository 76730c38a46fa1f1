//! Generation service credential kept alongside the scenes.

use storyboard_shared::{Result, StoryboardError};
use storyboard_storage::{API_KEY_KEY, KeyValueStore};

/// The stored API key, if one has been saved.
pub async fn load_api_key(kv: &impl KeyValueStore) -> Result<Option<String>> {
    Ok(kv.get(API_KEY_KEY).await?.filter(|k| !k.is_empty()))
}

/// Save `key` for later runs.
pub async fn save_api_key(kv: &impl KeyValueStore, key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(StoryboardError::validation("API key must not be empty"));
    }
    kv.set(API_KEY_KEY, key).await
}

/// Forget the stored API key.
pub async fn clear_api_key(kv: &impl KeyValueStore) -> Result<()> {
    kv.remove(API_KEY_KEY).await
}

/// `sk-a…wxyz` style rendering for display.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
