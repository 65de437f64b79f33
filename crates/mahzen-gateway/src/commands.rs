use std::fmt::Write as _;

use anyhow::Result;
use mahzen_memory::now_epoch_ms;
use tracing::{info, warn};

use crate::preferences::help_text as preference_help;
use crate::{InboundMessage, MahzenGateway};

const GROUP_ONLY: &str = "Bu komut sadece gruplarda çalışır!";
const ADMIN_ONLY: &str = "Bu komutu sadece bot yöneticileri kullanabilir.";
const MEMBER_LIMIT: usize = 10;
const MEMBER_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SlashCommand {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlashInput {
    Command(SlashCommand),
    /// A command addressed to some other bot (`/start@otherbot`).
    Foreign,
    Text,
}

/// `/name[@bot] ...`. `/<bot_username> ...` is a mention, not a command.
/// Anything after the command word is ignored.
pub(crate) fn parse_slash_command(text: &str, bot_username: &str) -> SlashInput {
    let Some(body) = text.trim().strip_prefix('/') else {
        return SlashInput::Text;
    };
    let head = body.split_whitespace().next().unwrap_or_default();
    let (name, target) = match head.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (head, None),
    };
    if name.is_empty() || (!bot_username.is_empty() && name.eq_ignore_ascii_case(bot_username)) {
        return SlashInput::Text;
    }
    if let Some(target) = target
        && !target.eq_ignore_ascii_case(bot_username)
    {
        return SlashInput::Foreign;
    }
    SlashInput::Command(SlashCommand {
        name: name.to_lowercase(),
    })
}

impl MahzenGateway {
    /// Returns the reply text, or `None` for commands this bot does not know.
    pub(crate) fn handle_command(
        &self,
        message: &InboundMessage,
        command: &SlashCommand,
    ) -> Result<Option<String>> {
        let group_only = matches!(
            command.name.as_str(),
            "ozet" | "temizle" | "uyeler" | "tercihsifirla"
        );
        if group_only && !message.is_group() {
            return Ok(Some(GROUP_ONLY.to_string()));
        }

        let reply = match command.name.as_str() {
            "start" => welcome_text(),
            "help" => help_text(),
            "status" => self.status_text(message),
            "memory" => self.memory_text(message)?,
            "clear" => self.clear_history(message)?,
            "groupinfo" => self.group_info_text(message),
            "ozet" => {
                let history = self.open_history()?;
                info!(
                    chat_id = message.chat_id,
                    user_id = message.user_id,
                    "summary requested"
                );
                self.summarize(history.as_ref(), message.chat_id)?
            }
            "temizle" => {
                if let Some(history) = self.open_history()? {
                    history.clear_group_messages(message.chat_id)?;
                }
                info!(
                    chat_id = message.chat_id,
                    user_id = message.user_id,
                    "group history cleared"
                );
                "Grup mesajları temizlendi!".to_string()
            }
            "uyeler" => self.members_text(message)?,
            "tercihsifirla" => {
                if !self.config.chat.is_admin(message.user_id) {
                    warn!(
                        chat_id = message.chat_id,
                        user_id = message.user_id,
                        "non-admin tried to clear chat preferences"
                    );
                    ADMIN_ONLY.to_string()
                } else {
                    self.consent.clear_scope(message.chat_id).message
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(reply))
    }

    fn status_text(&self, message: &InboundMessage) -> String {
        format!(
            "Bot durumu: aktif\nModel: {}\nKullanıcı: {}\nUser ID: {}\nKimlik: Mahzen grubunun edebi kölesi",
            self.model.model_id(),
            message.display_name,
            message.user_id
        )
    }

    fn memory_text(&self, message: &InboundMessage) -> Result<String> {
        let Some(history) = self.open_history()? else {
            return Ok("Hafıza kapalı; mesajlar kaydedilmiyor.".to_string());
        };
        let stats = history.stats()?;
        let private = history.private_history(message.user_id)?.len();
        let mut text = format!(
            "Hafıza durumu:\nToplam grup: {}\nToplam grup mesajı: {}\nMaksimum mesaj/grup: {}\n",
            stats.group_chats,
            stats.group_messages,
            history.limits().group_messages
        );
        if message.is_group() {
            let own = history
                .conversation_history(message.chat_id, message.user_id)?
                .len();
            let _ = write!(text, "\nBu gruptaki konuşmanız: {own} mesaj");
        }
        let _ = write!(
            text,
            "\nÖzel konuşmanız: {private} mesaj\nUser ID: {}\nChat ID: {}",
            message.user_id, message.chat_id
        );
        Ok(text)
    }

    fn clear_history(&self, message: &InboundMessage) -> Result<String> {
        if let Some(history) = self.open_history()? {
            if message.is_group() {
                history.clear_user_messages(message.chat_id, message.user_id)?;
            }
            history.clear_private_messages(message.user_id)?;
        }
        info!(
            chat_id = message.chat_id,
            user_id = message.user_id,
            "conversation history cleared"
        );
        Ok(if message.is_group() {
            "Grup ve özel mesaj geçmişiniz temizlendi!".to_string()
        } else {
            "Özel mesaj geçmişiniz temizlendi!".to_string()
        })
    }

    fn group_info_text(&self, message: &InboundMessage) -> String {
        format!(
            "Grup bilgileri:\nChat tipi: {}\nChat ID: {}\nBot kullanıcı adı: @{bot}\n\nKullanım:\n- @{bot} merhaba\n- Bota yanıt vererek mesaj gönder\n- /groupinfo ile bu bilgileri göster",
            message.chat_kind.as_str(),
            message.chat_id,
            bot = self.bot_username
        )
    }

    fn members_text(&self, message: &InboundMessage) -> Result<String> {
        let members = match self.open_history()? {
            Some(history) => history.member_summaries(
                message.chat_id,
                self.config.memory.summary_window_hours,
                now_epoch_ms(),
                MEMBER_LIMIT,
            )?,
            None => Vec::new(),
        };
        if members.is_empty() {
            return Ok("Henüz grup üyelerinin mesajları kaydedilmemiş.".to_string());
        }
        let mut text = String::from("Grup üyelerinin durumu:\n");
        for (index, member) in members.iter().enumerate() {
            let _ = write!(
                text,
                "\n{}. {}\n   Mesaj sayısı: {}\n   Son mesaj: {}\n",
                index + 1,
                member.username,
                member.message_count,
                preview(&member.last_message)
            );
        }
        Ok(text.trim_end().to_string())
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > MEMBER_PREVIEW_CHARS {
        let head: String = text.chars().take(MEMBER_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn welcome_text() -> String {
    "Selamün aleyküm! Ben mahzen grubunun şahsi kölesiyim.\n\n\
     Sorularınıza yapay zeka ile cevap veririm ve grup sohbetlerinde aktifim.\n\
     Gruplarda beni @ ile etiketleyin ya da mesajıma yanıt verin.\n\
     Komutlar için /help yazın."
        .to_string()
}

fn help_text() -> String {
    format!(
        "Temel komutlar:\n\
         /start - hoş geldin mesajı\n\
         /help - bu yardım\n\
         /status - bot durumu\n\
         /memory - hafıza durumu\n\
         /clear - konuşma geçmişini temizle\n\n\
         Grup komutları:\n\
         /groupinfo - grup bilgileri\n\
         /ozet - son konuşmaların özeti\n\
         /temizle - grup mesajlarını temizle\n\
         /uyeler - grup üyelerinin durumu\n\
         /tercihsifirla - bu sohbetteki tüm tercih kayıtlarını sil (yönetici)\n\n\
         {}\n\n\
         Herkes yalnızca kendi tercihlerini belirleyebilir; başkası adına tercih kaydedilemez.",
        preference_help()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_and_without_bot_suffix() {
        assert_eq!(
            parse_slash_command("/ozet", "mahzen_bot"),
            SlashInput::Command(SlashCommand {
                name: "ozet".to_string(),
            })
        );
        assert_eq!(
            parse_slash_command("/Status@Mahzen_Bot extra", "mahzen_bot"),
            SlashInput::Command(SlashCommand {
                name: "status".to_string(),
            })
        );
        assert_eq!(
            parse_slash_command("/start@other_bot", "mahzen_bot"),
            SlashInput::Foreign
        );
    }

    #[test]
    fn bot_name_prefix_is_a_mention() {
        assert_eq!(
            parse_slash_command("/mahzen_bot tercih onayla", "mahzen_bot"),
            SlashInput::Text
        );
        assert_eq!(parse_slash_command("merhaba", "mahzen_bot"), SlashInput::Text);
    }

    #[test]
    fn preview_cuts_long_messages() {
        let long = "a".repeat(60);
        assert_eq!(preview(&long).chars().count(), MEMBER_PREVIEW_CHARS + 3);
        assert_eq!(preview("kısa"), "kısa");
    }
}
