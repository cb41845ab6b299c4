//! Chat-completion backends for the canonical-summary normalizer.
//!
//! Implements [`CompletionBackend`] for:
//! - **OpenAI**: `POST https://api.openai.com/v1/chat/completions`,
//!   key from `OPENAI_API_KEY`.
//! - **Azure OpenAI**: `POST {endpoint}/openai/deployments/{model}/chat/completions?api-version=...`,
//!   key from `AZURE_OPENAI_API_KEY`. `model` is the deployment name.
//! - **Disabled**: every call fails. Enough for commands that never
//!   normalize (listing, inspecting, raw-text queries).
//!
//! The request temperature comes from the [`CompletionRequest`]; the
//! normalizer always sends 0.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use ticket_dedup_core::normalize::{
    CompletionBackend, CompletionRequest, Normalizer, TextNormalizer,
};

use crate::config::NormalizerConfig;
use crate::http;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Build the normalizer configured in `[normalizer]`.
pub fn create_normalizer(config: &NormalizerConfig) -> Result<Arc<dyn Normalizer>> {
    let backend: Box<dyn CompletionBackend> = match config.provider.as_str() {
        "openai" | "azure" => Box::new(ChatBackend::new(config)?),
        "disabled" => Box::new(DisabledBackend),
        other => bail!("Unknown normalizer provider: {}", other),
    };
    Ok(Arc::new(TextNormalizer::new(backend)))
}

pub struct DisabledBackend;

#[async_trait]
impl CompletionBackend for DisabledBackend {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        bail!("Normalizer is disabled; set [normalizer] provider to openai or azure")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    OpenAI,
    Azure,
}

pub struct ChatBackend {
    flavor: Flavor,
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl ChatBackend {
    /// # Errors
    ///
    /// Fails when `model` is not set, the Azure endpoint is missing, or
    /// the provider's API key is not in the environment.
    pub fn new(config: &NormalizerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("normalizer.model required"))?;

        let (flavor, url, key_var) = match config.provider.as_str() {
            "openai" => (Flavor::OpenAI, OPENAI_CHAT_URL.to_string(), "OPENAI_API_KEY"),
            "azure" => {
                let endpoint = config
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("normalizer.endpoint required for Azure"))?;
                (
                    Flavor::Azure,
                    azure_chat_url(endpoint, &model, &config.api_version),
                    "AZURE_OPENAI_API_KEY",
                )
            }
            other => bail!("Unknown chat provider: {}", other),
        };

        let api_key = std::env::var(key_var)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", key_var))?;

        Ok(Self {
            flavor,
            client: http::client(config.timeout_secs)?,
            url,
            model,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionBackend for ChatBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = chat_body(&self.model, request);
        let service = match self.flavor {
            Flavor::OpenAI => "OpenAI",
            Flavor::Azure => "Azure OpenAI",
        };

        let json = http::send_json(service, self.max_retries, || {
            let req = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(&body);
            match self.flavor {
                Flavor::OpenAI => req.header("Authorization", format!("Bearer {}", self.api_key)),
                Flavor::Azure => req.header("api-key", &self.api_key),
            }
        })
        .await?;

        parse_chat_response(&json)
    }
}

pub fn azure_chat_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

fn chat_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "temperature": request.temperature,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.user },
        ],
    })
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(String::from)
        .ok_or_else(|| {
            anyhow::anyhow!("Invalid chat completion response: missing choices[0].message.content")
        })
}
