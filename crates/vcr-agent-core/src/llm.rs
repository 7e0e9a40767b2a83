//! OpenAI-compatible chat completion client.
//!
//! Failures keep their cause: connect errors, HTTP error statuses and
//! timeouts map to distinct [`PipelineError`] variants so a caller can tell
//! "service down" from "request rejected" from "service too slow".

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::LlmConfig;
use crate::domain::{PipelineError, RenderPlan, Result};

/// Model id used when none is configured and the endpoint lists none.
pub const FALLBACK_MODEL: &str = "local-model";

/// Longest slice of an error body carried in `ModelHttp`.
const ERROR_BODY_LIMIT: usize = 500;

pub const SYSTEM_PROMPT: &str = r#"You are the VCR Engine Brain. You only output valid VCR YAML manifests.
A VCR manifest MUST follow this structure:

version: 1
environment:
  resolution: {width: 1280, height: 720}
  fps: 24
  duration: 5.0
layers:
  - id: background
    procedural:
      kind: solid_color
      color: {r: 0.0, g: 0.0, b: 0.0, a: 1.0}
  - id: sample_text
    text:
      content: "HELLO"
      font_size: 120
      font_family: "GeistPixel-Line"
      color: {r: 1.0, g: 1.0, b: 1.0, a: 1.0}
    position: {x: 640, y: 360}
    anchor: center

Rules:
1. No conversational text.
2. Use "procedural" with "kind: solid_color" for backgrounds.
3. Colors (r, g, b, a) are 0.0 to 1.0.
4. Use ONLY font_family: "GeistPixel-Line".
5. Resolution and position are integers."#;

/// Build the user turn from context, the request, and the target plan.
pub fn user_message(context: &str, prompt: &str, plan: &RenderPlan) -> String {
    let resolution = plan.resolution();
    format!(
        "Creative Context from Intelligence Tree:\n{context}\n\n\
         User Request: {prompt}\n\n\
         Target environment: resolution {{width: {}, height: {}}}, fps {}, duration {:?}\n\n\
         Generate the YAML manifest now:",
        resolution.width,
        resolution.height,
        plan.fps(),
        plan.duration(),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST {endpoint}/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
}

impl ChatRequest {
    /// A system + user exchange pinned to greedy decoding.
    pub fn new(model: impl Into<String>, system: &str, user: &str) -> Self {
        Self {
            model: model.into(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: 0.0,
        }
    }
}

/// Generator seam used by the orchestrator.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Base URL, for diagnostics.
    fn endpoint(&self) -> &str;

    /// Configured model, else the first one the endpoint lists, else
    /// [`FALLBACK_MODEL`]. Never fails.
    async fn resolve_model(&self) -> String;

    /// Run one completion and return the first choice's text.
    async fn complete(&self, request: &ChatRequest, timeout: Duration) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Client for any OpenAI-compatible provider (local or hosted).
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vcr-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::ModelConnect {
                endpoint: config.endpoint.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { config, http })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn classify(&self, err: reqwest::Error, timeout: Duration) -> PipelineError {
        if err.is_timeout() {
            PipelineError::ModelTimeout { timeout }
        } else if err.is_decode() {
            PipelineError::ModelInvalidResponse(err.to_string())
        } else {
            PipelineError::ModelConnect {
                endpoint: self.config.endpoint.clone(),
                message: err.to_string(),
            }
        }
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, reqwest::Error> {
        let resp = self
            .authorized(self.http.get(format!("{}/models", self.config.endpoint)))
            .timeout(self.config.models_timeout)
            .send()
            .await?
            .error_for_status()?;
        let list: ModelList = resp.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn resolve_model(&self) -> String {
        if let Some(model) = &self.config.model {
            return model.clone();
        }
        match self.list_models().await {
            Ok(ids) => ids
                .into_iter()
                .next()
                .unwrap_or_else(|| FALLBACK_MODEL.to_string()),
            Err(e) => {
                debug!(error = %e, "Model auto-detect failed");
                FALLBACK_MODEL.to_string()
            }
        }
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: &ChatRequest, timeout: Duration) -> Result<String> {
        let resp = self
            .authorized(
                self.http
                    .post(format!("{}/chat/completions", self.config.endpoint)),
            )
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.classify(e, timeout))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.classify(e, timeout))?;
        if !status.is_success() {
            return Err(PipelineError::ModelHttp {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::ModelInvalidResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(PipelineError::ModelEmptyResponse)?;
        Ok(choice.message.and_then(|m| m.content).unwrap_or_default())
    }
}
