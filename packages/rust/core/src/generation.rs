//! Scene generation boundary.
//!
//! [`SceneGenerator`] is the single call the pipeline makes per scene.
//! [`OpenAiGenerator`] implements it over the OpenAI chat-completions API,
//! asking for a JSON object with `summary` and `script` fields.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use storyboard_shared::{OpenAiConfig, OpenAiModel, Result, Scene, StoryboardError};

use crate::context::Context;

/// Produces the generated fields of one scene.
///
/// Implementations keep `name` and `description` and replace `summary` and
/// `script`. Anything that prevents a usable scene is an `Err`, never a panic.
#[allow(async_fn_in_trait)]
pub trait SceneGenerator {
    async fn generate(&self, scene: &Scene, context: &Context) -> Result<Scene>;
}

impl<T: SceneGenerator + ?Sized> SceneGenerator for &T {
    async fn generate(&self, scene: &Scene, context: &Context) -> Result<Scene> {
        (**self).generate(scene, context).await
    }
}

const SYSTEM_PROMPT: &str = "You are a screenwriter turning a storyboard into a screenplay, one scene at a time. \
Continue the story so it stays consistent with the summary and script written so far. \
If the summary says this is the final scene, bring the story to a close. \
Reply with only a JSON object with two string fields: \
\"summary\", a few sentences describing what happens in this scene, and \
\"script\", the screenplay text for this scene.";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// The JSON object the model is asked to return.
#[derive(Debug, Deserialize)]
struct GeneratedFields {
    summary: String,
    script: String,
}

// ---------------------------------------------------------------------------
// OpenAI client
// ---------------------------------------------------------------------------

/// [`SceneGenerator`] backed by the OpenAI chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: OpenAiModel,
    temperature: f64,
}

impl OpenAiGenerator {
    /// Build a generator for `model` using the endpoint and timeout from `config`.
    pub fn new(config: &OpenAiConfig, api_key: impl Into<String>, model: OpenAiModel) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Storyboard/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoryboardError::Network(format!("client build: {e}")))?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            StoryboardError::config(format!("invalid base_url {:?}: {e}", config.base_url))
        })?;
        let endpoint = format!(
            "{}/chat/completions",
            base_url.as_str().trim_end_matches('/')
        );

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model,
            temperature: config.temperature,
        })
    }
}

impl SceneGenerator for OpenAiGenerator {
    #[instrument(skip_all, fields(scene = %scene.name, model = %self.model))]
    async fn generate(&self, scene: &Scene, context: &Context) -> Result<Scene> {
        let start = Instant::now();
        let request = ChatRequest {
            model: self.model.as_str(),
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: user_prompt(scene, context),
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| StoryboardError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoryboardError::Generation(format!(
                "HTTP {status}: {}",
                truncate_for_log(&body, 200)
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| StoryboardError::Generation(format!("invalid response body: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| StoryboardError::Generation("response contained no content".into()))?;

        debug!(chars = content.len(), "received completion");
        let fields = parse_generated(&content)?;

        info!(elapsed_ms = start.elapsed().as_millis(), "scene generated");

        Ok(Scene {
            name: scene.name.clone(),
            description: scene.description.clone(),
            summary: fields.summary,
            script: fields.script,
        })
    }
}

/// Render the per-scene user message.
fn user_prompt(scene: &Scene, context: &Context) -> String {
    let summary = context.summary.trim();
    let script = context.script.trim();
    format!(
        "Story summary so far:\n{}\n\nScript so far:\n{}\n\nScene name:\n{}\n\nScene description:\n{}",
        if summary.is_empty() { "(this is the first scene)" } else { summary },
        if script.is_empty() { "(none)" } else { script },
        scene.name,
        scene.description,
    )
}

/// Pull the `{summary, script}` object out of the model's reply.
///
/// Models sometimes wrap the object in a code fence or a sentence, so only the
/// outermost braces are parsed.
fn parse_generated(content: &str) -> Result<GeneratedFields> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &content[s..=e],
        _ => {
            return Err(StoryboardError::Generation(format!(
                "reply is not a JSON object: {}",
                truncate_for_log(content, 200)
            )));
        }
    };

    let fields: GeneratedFields = serde_json::from_str(json)
        .map_err(|e| StoryboardError::Generation(format!("reply JSON is malformed: {e}")))?;

    if fields.summary.trim().is_empty() || fields.script.trim().is_empty() {
        return Err(StoryboardError::Generation(
            "reply has an empty summary or script".into(),
        ));
    }
    Ok(fields)
}

fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
