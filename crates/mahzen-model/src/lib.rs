use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Text-in, text-out generative model.
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;
    fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model_id: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(endpoint: &str, model_id: &str, api_key: &str, timeout_ms: u64) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            bail!("model api key is empty");
        }
        let model_id = model_id.trim();
        if model_id.is_empty() {
            bail!("model id is empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .with_context(|| "failed to build model HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn generate_url(&self) -> String {
        let model = if self.model_id.starts_with("models/") {
            self.model_id.clone()
        } else {
            format!("models/{}", self.model_id)
        };
        format!("{}/v1beta/{model}:generateContent", self.endpoint)
    }
}

impl LanguageModel for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(self.generate_url())
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({
                "contents": [{ "parts": [{ "text": prompt }] }]
            }))
            .send()
            .with_context(|| "failed to call model generateContent")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            bail!("model generateContent failed: {} {}", status.as_u16(), body);
        }
        let parsed = response
            .json::<GenerateResponse>()
            .with_context(|| "failed to parse model response")?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return Err(anyhow!("model returned no text"));
        }
        debug!(model = %self.model_id, chars = text.chars().count(), "model reply received");
        Ok(text.to_string())
    }
}

/// Replays fixed replies in order and records every prompt it was given.
/// An empty queue makes `generate` fail.
#[derive(Default)]
pub struct CannedModel {
    replies: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl CannedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

impl LanguageModel for CannedModel {
    fn model_id(&self) -> &str {
        "canned"
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("canned model lock poisoned"))?
            .push(prompt.to_string());
        self.replies
            .lock()
            .map_err(|_| anyhow!("canned model lock poisoned"))?
            .pop()
            .ok_or_else(|| anyhow!("canned model has no replies left"))
    }
}

/// Cuts `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
