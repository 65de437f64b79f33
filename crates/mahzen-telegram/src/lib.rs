use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Extra time allowed on top of a long-poll timeout before the HTTP call gives up.
const LONG_POLL_GRACE_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct TelegramGateway {
    client: Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

impl TelegramUser {
    /// `@username` when set, otherwise the first name.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.first_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

impl TelegramChat {
    pub fn is_group(&self) -> bool {
        matches!(self.kind.as_str(), "group" | "supergroup")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl TelegramGateway {
    pub fn new(token: &str, timeout_ms: u64) -> Result<Self> {
        Self::with_api_base(token, timeout_ms, TELEGRAM_API_BASE)
    }

    pub fn with_api_base(token: &str, timeout_ms: u64, api_base: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            bail!("telegram token is empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .with_context(|| "failed to build telegram HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .with_context(|| "failed to call telegram getMe")?;
        read_envelope(response, "telegram getMe")
    }

    pub fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<TelegramMessage> {
        if text.trim().is_empty() {
            bail!("text is required");
        }
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(message_id) = reply_to {
            body["reply_parameters"] = serde_json::json!({
                "message_id": message_id,
                "allow_sending_without_reply": true,
            });
        }
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .with_context(|| "failed to call telegram sendMessage")?;
        let message: TelegramMessage = read_envelope(response, "telegram sendMessage")?;
        debug!(chat_id, message_id = message.message_id, "telegram message sent");
        Ok(message)
    }

    /// Long-polls for updates with `update_id >= offset`.
    pub fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<TelegramUpdate>> {
        let mut query = vec![
            ("timeout", timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&query)
            .timeout(Duration::from_secs(timeout_secs + LONG_POLL_GRACE_SECS))
            .send()
            .with_context(|| "failed to call telegram getUpdates")?;
        read_envelope(response, "telegram getUpdates")
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }
}

fn read_envelope<T: DeserializeOwned>(response: Response, operation: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        bail!("{operation} failed: {} {}", status.as_u16(), body);
    }
    let envelope = response
        .json::<Envelope<T>>()
        .with_context(|| format!("failed to parse {operation} response"))?;
    if !envelope.ok {
        bail!(
            "{operation} returned ok=false: {}",
            envelope.description.unwrap_or_default()
        );
    }
    envelope
        .result
        .with_context(|| format!("{operation} response has no result"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_rejected() {
        let err = TelegramGateway::new("   ", 1_000).expect_err("must fail");
        assert!(err.to_string().contains("token is empty"));
    }

    #[test]
    fn display_name_prefers_username() {
        let user: TelegramUser =
            serde_json::from_str(r#"{"id": 1, "first_name": "Ayşe", "username": "ayse"}"#)
                .expect("parse user");
        assert_eq!(user.display_name(), "ayse");
        let user: TelegramUser =
            serde_json::from_str(r#"{"id": 1, "first_name": "Ayşe"}"#).expect("parse user");
        assert_eq!(user.display_name(), "Ayşe");
    }

    #[test]
    fn supergroups_count_as_groups() {
        let chat: TelegramChat =
            serde_json::from_str(r#"{"id": -100, "type": "supergroup", "title": "mahzen"}"#)
                .expect("parse chat");
        assert!(chat.is_group());
        let chat: TelegramChat =
            serde_json::from_str(r#"{"id": 42, "type": "private"}"#).expect("parse chat");
        assert!(!chat.is_group());
    }
}
