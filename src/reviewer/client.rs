use super::ReviewError;
use crate::config::LlmConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Minimal OpenAI-compatible chat-completion client with model fallback.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: String,
    models: Vec<String>,
    api_key: Option<String>,
    api_key_env: String,
    referer: String,
}

impl ChatClient {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self, ReviewError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(ReviewError::Client)?;
        Ok(Self {
            http,
            endpoint: config.api_base_url.clone(),
            models: config.models.clone(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_key_env: config.api_key_env.clone(),
            referer: config.referer.clone(),
        })
    }

    /// Send one system+user exchange, trying each model in order until one
    /// returns a non-empty answer.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, ReviewError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ReviewError::MissingApiKey(self.api_key_env.clone()))?;

        let mut last_err = ReviewError::NoModels;
        for model in &self.models {
            match self.complete_with(model, api_key, system, user).await {
                Ok(text) => {
                    debug!("{model} answered ({} bytes)", text.len());
                    return Ok(text);
                }
                Err(e) => {
                    warn!("{e}; trying next model");
                    last_err = e;
                }
            }
        }
        match last_err {
            ReviewError::NoModels => Err(ReviewError::NoModels),
            e => Err(ReviewError::Exhausted(Box::new(e))),
        }
    }

    async fn complete_with(
        &self,
        model: &str,
        api_key: &str,
        system: &str,
        user: &str,
    ) -> Result<String, ReviewError> {
        let body = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
        };

        let transport = |source| ReviewError::Transport {
            model: model.to_string(),
            source,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.referer)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewError::Status {
                model: model.to_string(),
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let bytes = response.bytes().await.map_err(transport)?;
        let parsed: ChatResponse =
            serde_json::from_slice(&bytes).map_err(|source| ReviewError::Decode {
                model: model.to_string(),
                source,
            })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ReviewError::Empty {
                model: model.to_string(),
            })
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
