use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pedido_core::config::AppConfig;

use crate::profiles::InstructionProfile;

#[derive(Debug, Error)]
pub enum NluError {
    #[error("nlu transport error: {0}")]
    Transport(String),
    #[error("nlu engine returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("nlu engine returned no choices")]
    EmptyResponse,
    #[error("nlu engine did not answer within {after_secs}s")]
    Timeout { after_secs: u64 },
    #[error("no scripted response left for profile `{0}`")]
    Exhausted(&'static str),
}

/// Text-in, text-out access to a language model.
#[async_trait]
pub trait NluEngine: Send + Sync {
    async fn generate(&self, profile: InstructionProfile, input: &str) -> Result<String, NluError>;
}

/// Chat-completions client; works against OpenAI and Ollama's compatible endpoint.
pub struct HttpNluEngine {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

impl HttpNluEngine {
    pub fn from_config(config: &AppConfig) -> Result<Self, NluError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.nlu.timeout_secs))
            .build()
            .map_err(|error| NluError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", config.nlu_base_url().trim_end_matches('/')),
            model: config.nlu.model.clone(),
            api_key: config.nlu.api_key.clone(),
            timeout_secs: config.nlu.timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl NluEngine for HttpNluEngine {
    async fn generate(&self, profile: InstructionProfile, input: &str) -> Result<String, NluError> {
        let instructions = profile.instructions();
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage { role: "system", content: &instructions },
                ChatMessage { role: "user", content: input },
            ],
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                NluError::Timeout { after_secs: self.timeout_secs }
            } else {
                NluError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NluError::Status { status: status.as_u16(), body });
        }

        let parsed: ApiResponse =
            response.json().await.map_err(|error| NluError::Transport(error.to_string()))?;

        tracing::debug!(
            event_name = "nlu.generated",
            profile = profile.name(),
            model = %self.model,
            "nlu engine answered"
        );

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(NluError::EmptyResponse)
    }
}

/// Canned engine for tests and offline runs.
///
/// Each profile has its own queue; calls are recorded so tests can assert an
/// extractor was never reached.
#[derive(Default)]
pub struct ScriptedNlu {
    responses: Mutex<HashMap<InstructionProfile, VecDeque<Result<String, String>>>>,
    calls: Mutex<Vec<(InstructionProfile, String)>>,
}

impl ScriptedNlu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, profile: InstructionProfile, output: impl Into<String>) -> Self {
        self.push(profile, Ok(output.into()));
        self
    }

    pub fn fail(self, profile: InstructionProfile, reason: impl Into<String>) -> Self {
        self.push(profile, Err(reason.into()));
        self
    }

    pub fn push(&self, profile: InstructionProfile, response: Result<String, String>) {
        let mut responses = match self.responses.lock() {
            Ok(responses) => responses,
            Err(poisoned) => poisoned.into_inner(),
        };
        responses.entry(profile).or_default().push_back(response);
    }

    pub fn calls(&self) -> Vec<(InstructionProfile, String)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn calls_for(&self, profile: InstructionProfile) -> usize {
        self.calls().iter().filter(|(called, _)| *called == profile).count()
    }
}

#[async_trait]
impl NluEngine for ScriptedNlu {
    async fn generate(&self, profile: InstructionProfile, input: &str) -> Result<String, NluError> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push((profile, input.to_string())),
            Err(poisoned) => poisoned.into_inner().push((profile, input.to_string())),
        }

        let next = match self.responses.lock() {
            Ok(mut responses) => responses.get_mut(&profile).and_then(VecDeque::pop_front),
            Err(poisoned) => {
                poisoned.into_inner().get_mut(&profile).and_then(VecDeque::pop_front)
            }
        };

        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(reason)) => Err(NluError::Transport(reason)),
            None => Err(NluError::Exhausted(profile.name())),
        }
    }
}
