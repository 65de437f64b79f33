//! Message handling for the chat bot: slash commands, history recording,
//! the `tercih` preference adapter, group summaries and model replies.

mod commands;
pub mod preferences;
pub mod prompt;

use std::sync::Arc;

use anyhow::Result;
use mahzen_common::MahzenConfig;
use mahzen_memory::{HistoryLimits, HistoryStore, now_epoch_ms};
use mahzen_model::{LanguageModel, truncate_reply};
use mahzen_prefs::{ConsentLifecycle, PreferenceStore};
use mahzen_telegram::{TelegramGateway, TelegramMessage};
use tracing::{debug, error, info, warn};

use crate::preferences::{mentions_preferences, parse_preference_command};
use crate::prompt::{ReplyContext, build_reply_prompt, build_summary_prompt};

pub const GENERIC_FAILURE: &str = "Bir hata oluştu. Lütfen daha sonra tekrar deneyin.";
const MODEL_FAILURE: &str = "Üzgünüm, şu anda yanıt veremiyorum. Lütfen daha sonra tekrar deneyin.";
const SUMMARY_FAILURE: &str = "Üzgünüm efendimiz, özet oluşturamadım. Belki daha sonra tekrar deneyin.";
const PROMPT_MEMBER_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
        }
    }
}

/// A text message as the gateway sees it, independent of the wire format.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub message_id: i64,
    pub user_id: i64,
    pub display_name: String,
    pub text: String,
    pub reply_to_bot: bool,
}

impl InboundMessage {
    /// Returns `None` for updates without text or sender.
    pub fn from_telegram(message: &TelegramMessage, bot_id: i64) -> Option<Self> {
        let text = message.text.as_deref()?;
        let from = message.from.as_ref()?;
        let reply_to_bot = message
            .reply_to_message
            .as_ref()
            .and_then(|replied| replied.from.as_ref())
            .is_some_and(|author| author.id == bot_id);
        Some(Self {
            chat_id: message.chat.id,
            chat_kind: if message.chat.is_group() {
                ChatKind::Group
            } else {
                ChatKind::Private
            },
            message_id: message.message_id,
            user_id: from.id,
            display_name: from.display_name().to_string(),
            text: text.to_string(),
            reply_to_bot,
        })
    }

    pub fn is_group(&self) -> bool {
        self.chat_kind == ChatKind::Group
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i64>,
}

/// Where replies go once a message has been handled.
pub trait ReplySink {
    fn deliver(&self, reply: &OutboundReply) -> Result<()>;
}

impl ReplySink for TelegramGateway {
    fn deliver(&self, reply: &OutboundReply) -> Result<()> {
        self.send_message(reply.chat_id, &reply.text, reply.reply_to)?;
        Ok(())
    }
}

pub struct MahzenGateway {
    config: MahzenConfig,
    consent: ConsentLifecycle,
    model: Arc<dyn LanguageModel>,
    bot_username: String,
}

impl MahzenGateway {
    pub fn new(
        config: MahzenConfig,
        model: Arc<dyn LanguageModel>,
        bot_username: impl Into<String>,
    ) -> Self {
        let store = PreferenceStore::open(config.preferences_path());
        Self {
            consent: ConsentLifecycle::new(Arc::new(store)),
            config,
            model,
            bot_username: bot_username.into().trim_start_matches('@').to_string(),
        }
    }

    pub fn consent(&self) -> &ConsentLifecycle {
        &self.consent
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    /// Handles `message` and hands every reply to `sink`. A failed handler
    /// still answers with [`GENERIC_FAILURE`]; nothing here returns an error.
    pub fn process(&self, message: &InboundMessage, sink: &dyn ReplySink) {
        let replies = match self.handle(message) {
            Ok(replies) => replies,
            Err(err) => {
                error!(
                    chat_id = message.chat_id,
                    user_id = message.user_id,
                    "message handling failed: {err:#}"
                );
                vec![self.reply(message, GENERIC_FAILURE.to_string())]
            }
        };
        for reply in &replies {
            if let Err(err) = sink.deliver(reply) {
                error!(chat_id = reply.chat_id, "reply delivery failed: {err:#}");
            }
        }
    }

    pub fn handle(&self, message: &InboundMessage) -> Result<Vec<OutboundReply>> {
        let text = message.text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        if message.is_group() && !self.config.chat.is_group_allowed(message.chat_id) {
            warn!(
                chat_id = message.chat_id,
                user_id = message.user_id,
                "message from group outside the allowlist ignored"
            );
            return Ok(Vec::new());
        }

        match commands::parse_slash_command(text, &self.bot_username) {
            commands::SlashInput::Command(command) => {
                let reply = self.handle_command(message, &command)?;
                return Ok(reply.into_iter().map(|text| self.reply(message, text)).collect());
            }
            commands::SlashInput::Foreign => return Ok(Vec::new()),
            commands::SlashInput::Text => {}
        }

        let history = self.open_history()?;
        let recorded_id = match &history {
            Some(history) if message.is_group() => Some(history.add_group_message(
                message.chat_id,
                message.user_id,
                &message.display_name,
                text,
            )?),
            Some(history) => Some(history.add_private_message(
                message.user_id,
                &message.display_name,
                text,
            )?),
            None => None,
        };

        let Some(request) = self.addressed_text(message, text) else {
            debug!(chat_id = message.chat_id, "group message not addressed to the bot");
            return Ok(Vec::new());
        };

        if mentions_preferences(request)
            && let Some(command) = parse_preference_command(request)
        {
            info!(
                chat_id = message.chat_id,
                user_id = message.user_id,
                ?command,
                "preference command"
            );
            let reply = preferences::execute(
                &self.consent,
                &command,
                message.chat_id,
                message.user_id,
                &message.display_name,
            );
            return Ok(vec![self.reply(message, reply)]);
        }

        if message.is_group() && is_summary_request(request) {
            let summary = self.summarize(history.as_ref(), message.chat_id)?;
            return Ok(vec![self.reply(message, summary)]);
        }

        let reply = self.answer(history.as_ref(), message, request, recorded_id)?;
        Ok(vec![self.reply(message, reply)])
    }

    /// The message text with the bot mention removed, or `None` when the
    /// message is not meant for the bot.
    fn addressed_text<'a>(&self, message: &InboundMessage, text: &'a str) -> Option<&'a str> {
        if !message.is_group() {
            return Some(text);
        }
        if !self.bot_username.is_empty() {
            for prefix in [format!("@{}", self.bot_username), format!("/{}", self.bot_username)] {
                if let Some(rest) = strip_prefix_ignore_case(text, &prefix) {
                    return Some(rest.trim());
                }
            }
        }
        message.reply_to_bot.then_some(text)
    }

    fn answer(
        &self,
        history: Option<&HistoryStore>,
        message: &InboundMessage,
        request: &str,
        recorded_id: Option<i64>,
    ) -> Result<String> {
        let memory = &self.config.memory;
        let (mut turns, members) = match history {
            Some(history) if message.is_group() => (
                history.conversation_history(message.chat_id, message.user_id)?,
                history.member_summaries(
                    message.chat_id,
                    memory.summary_window_hours,
                    now_epoch_ms(),
                    PROMPT_MEMBER_LIMIT,
                )?,
            ),
            Some(history) => (history.private_history(message.user_id)?, Vec::new()),
            None => (Vec::new(), Vec::new()),
        };
        turns.retain(|turn| Some(turn.id) != recorded_id);
        let start = turns.len().saturating_sub(memory.prompt_history);
        let preferences = self
            .consent
            .read_preferences(message.chat_id, message.user_id);

        let prompt = build_reply_prompt(&ReplyContext {
            members: &members,
            preferences: preferences.as_ref(),
            history: &turns[start..],
            message: request,
        });

        let reply = match self.model.generate(&prompt) {
            Ok(reply) => truncate_reply(&reply, self.config.chat.max_message_length),
            Err(err) => {
                error!(model = self.model.model_id(), "model reply failed: {err:#}");
                return Ok(MODEL_FAILURE.to_string());
            }
        };

        if let Some(history) = history {
            if message.is_group() {
                history.add_bot_response(
                    message.chat_id,
                    &reply,
                    message.user_id,
                    &message.display_name,
                )?;
            } else {
                history.add_private_bot_response(message.user_id, &reply)?;
            }
        }
        info!(
            chat_id = message.chat_id,
            user_id = message.user_id,
            "model reply sent"
        );
        Ok(reply)
    }

    fn summarize(&self, history: Option<&HistoryStore>, chat_id: i64) -> Result<String> {
        let hours = self.config.memory.summary_window_hours;
        let recent = match history {
            Some(history) => history.recent_group_messages(chat_id, hours, now_epoch_ms())?,
            None => Vec::new(),
        };
        if recent.is_empty() {
            return Ok(format!("Son {hours} saatte hiç mesaj bulunamadı."));
        }
        match self.model.generate(&build_summary_prompt(&recent)) {
            Ok(summary) => Ok(truncate_reply(
                &summary,
                self.config.chat.max_message_length,
            )),
            Err(err) => {
                error!(chat_id, "summary generation failed: {err:#}");
                Ok(SUMMARY_FAILURE.to_string())
            }
        }
    }

    fn open_history(&self) -> Result<Option<HistoryStore>> {
        if !self.config.memory.enabled {
            return Ok(None);
        }
        let limits = HistoryLimits {
            group_messages: self.config.memory.max_group_messages,
            private_messages: self.config.memory.max_private_messages,
        };
        Ok(Some(HistoryStore::open(
            &self.config.history_db_path(),
            limits,
        )?))
    }

    fn reply(&self, message: &InboundMessage, text: String) -> OutboundReply {
        OutboundReply {
            chat_id: message.chat_id,
            text,
            reply_to: Some(message.message_id),
        }
    }
}

fn is_summary_request(text: &str) -> bool {
    text.to_lowercase().contains("özet")
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &text[prefix.len()..];
    // `@mahzen_bot2` is a different bot.
    match rest.chars().next() {
        Some(next) if next.is_alphanumeric() || next == '_' => None,
        _ => Some(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_prefix_is_case_insensitive_and_whole_word() {
        assert_eq!(
            strip_prefix_ignore_case("@Mahzen_Bot selam", "@mahzen_bot"),
            Some(" selam")
        );
        assert_eq!(strip_prefix_ignore_case("@mahzen_bot2 selam", "@mahzen_bot"), None);
        assert_eq!(strip_prefix_ignore_case("@mah", "@mahzen_bot"), None);
        assert_eq!(strip_prefix_ignore_case("@mahzen_bot", "@mahzen_bot"), Some(""));
    }

    fn telegram_message(chat_kind: &str, from: i64, text: Option<&str>) -> TelegramMessage {
        TelegramMessage {
            message_id: 5,
            from: Some(mahzen_telegram::TelegramUser {
                id: from,
                is_bot: false,
                first_name: "Ayşe".to_string(),
                username: None,
            }),
            chat: mahzen_telegram::TelegramChat {
                id: -100,
                kind: chat_kind.to_string(),
                title: None,
            },
            text: text.map(str::to_string),
            reply_to_message: None,
        }
    }

    #[test]
    fn converts_telegram_messages() {
        let mut message = telegram_message("supergroup", 42, Some("selam"));
        message.reply_to_message = Some(Box::new(telegram_message("supergroup", 99, None)));
        let inbound = InboundMessage::from_telegram(&message, 99).expect("text message");
        assert!(inbound.is_group());
        assert!(inbound.reply_to_bot);
        assert_eq!(inbound.display_name, "Ayşe");
        assert_eq!(inbound.user_id, 42);

        let private = InboundMessage::from_telegram(&telegram_message("private", 42, Some("x")), 99)
            .expect("private message");
        assert_eq!(private.chat_kind, ChatKind::Private);
        assert!(!private.reply_to_bot);

        assert!(InboundMessage::from_telegram(&telegram_message("group", 42, None), 99).is_none());
    }

    #[test]
    fn summary_requests_match_both_forms() {
        assert!(is_summary_request("bugünü özetle"));
        assert!(is_summary_request("ÖZET ver"));
        assert!(!is_summary_request("selam"));
    }
}
