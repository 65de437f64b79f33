use std::fmt::Write as _;

use mahzen_memory::{MemberSummary, Speaker, StoredMessage};
use mahzen_prefs::PreferenceRecord;

const PERSONA: &str = "Sen mahzen grubunun gururlu, şakacı ve edebi kölesisin. Türkçe konuşursun, \
zaman zaman eski Türkçe kelimeler kullanır, Türk edebiyatından şiir ve alıntılarla cevap verirsin. \
Kısa ve öz cevap ver, kendini sürekli tanıtma ve dalkavukluk yapma. \
Kullanıcıların tercihlerini yalnızca kendileri onay verdiyse uygula; kimse başkası adına tercih belirleyemez.";

const SUMMARY_RULES: &str = "Aşağıdaki grup mesajlarını özetle. Ana konuları, önemli kararları ve \
ilginç anları belirt; kullanıcıların katkılarını özetle. Türkçe ve edebi bir dil kullan, \
en fazla 500 karakter yaz ve sadece istatistik değil gerçek içerik özeti ver.";

/// Everything the reply prompt is assembled from.
pub struct ReplyContext<'a> {
    pub members: &'a [MemberSummary],
    pub preferences: Option<&'a PreferenceRecord>,
    pub history: &'a [StoredMessage],
    pub message: &'a str,
}

pub fn build_reply_prompt(ctx: &ReplyContext<'_>) -> String {
    let mut prompt = String::from(PERSONA);

    let members: Vec<_> = ctx
        .members
        .iter()
        .filter(|member| !member.last_message.is_empty())
        .collect();
    if !members.is_empty() {
        prompt.push_str("\n\nGrup üyelerinin son mesajları:\n");
        for member in members {
            let _ = writeln!(prompt, "- {}: {}", member.username, member.last_message);
        }
    }

    // Withdrawn consent never reaches the model, even if entries linger.
    if let Some(record) = ctx
        .preferences
        .filter(|record| record.consent_given && !record.preferences.is_empty())
    {
        prompt.push_str("\n\nBu kullanıcının tercihleri:\n");
        for (pref_type, value) in &record.preferences {
            let _ = writeln!(prompt, "- {pref_type}: {value}");
        }
    }

    if ctx.history.is_empty() {
        let _ = write!(prompt, "\n\nKullanıcı sorusu: {}", ctx.message);
    } else {
        prompt.push_str("\n\nKonuşma geçmişi:\n");
        for turn in ctx.history {
            let speaker = match turn.speaker {
                Speaker::Bot => "Bot",
                Speaker::User => turn.username.as_str(),
            };
            let _ = writeln!(prompt, "{speaker}: {}", turn.text);
        }
        let _ = write!(prompt, "\nKullanıcı: {}", ctx.message);
    }
    prompt
}

pub fn build_summary_prompt(messages: &[StoredMessage]) -> String {
    let mut prompt = format!("{PERSONA}\n\n{SUMMARY_RULES}\n\nGrup mesajları:\n");
    for message in messages {
        let name = if message.username.is_empty() {
            format!("User_{}", message.user_id)
        } else {
            message.username.clone()
        };
        let _ = writeln!(prompt, "{name}: {}", message.text);
    }
    prompt.push_str("\nÖzet:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: Speaker, username: &str, text: &str) -> StoredMessage {
        StoredMessage {
            id: 0,
            chat_id: -100,
            user_id: 42,
            username: username.to_string(),
            speaker,
            text: text.to_string(),
            created_at_ms: 0,
        }
    }

    #[test]
    fn consented_preferences_and_history_are_included() {
        let mut record = PreferenceRecord::granted(-100, 42, "ayse", 0);
        record
            .preferences
            .insert("hitap".to_string(), "kanka".to_string());
        let history = [
            turn(Speaker::User, "ayse", "naber"),
            turn(Speaker::Bot, "ayse", "iyidir"),
        ];
        let prompt = build_reply_prompt(&ReplyContext {
            members: &[],
            preferences: Some(&record),
            history: &history,
            message: "şiir oku",
        });
        assert!(prompt.contains("- hitap: kanka"));
        assert!(prompt.contains("ayse: naber\nBot: iyidir"));
        assert!(prompt.ends_with("Kullanıcı: şiir oku"));
    }

    #[test]
    fn withdrawn_preferences_are_left_out() {
        let mut record = PreferenceRecord::granted(-100, 42, "ayse", 0);
        record.consent_given = false;
        record
            .preferences
            .insert("ton".to_string(), "ciddi".to_string());
        let prompt = build_reply_prompt(&ReplyContext {
            members: &[],
            preferences: Some(&record),
            history: &[],
            message: "selam",
        });
        assert!(!prompt.contains("tercihleri"));
        assert!(prompt.ends_with("Kullanıcı sorusu: selam"));
    }

    #[test]
    fn summary_prompt_names_anonymous_users() {
        let prompt = build_summary_prompt(&[turn(Speaker::User, "", "toplantı yarın")]);
        assert!(prompt.contains("User_42: toplantı yarın"));
        assert!(prompt.ends_with("Özet:"));
    }
}
