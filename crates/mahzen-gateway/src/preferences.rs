//! Turns free-text `tercih ...` messages into at most one consent/preference call.

use std::fmt::Write as _;

use mahzen_prefs::validator::{allow_list_lines, normalize};
use mahzen_prefs::{ConsentLifecycle, ConsentState, GRANT_COMMAND, PrincipalId, ScopeId};

const REVOKE: &[&str] = &["tercih onayı geri al", "tercih onayi geri al", "revoke consent"];
const SAVE: &[&str] = &["tercih kaydet", "preference save"];
const DELETE: &[&str] = &["tercih sil", "preference delete"];
const LIST: &[&str] = &["tercihlerim", "my preferences"];
const GRANT: &[&str] = &["tercih onayla", "preference consent"];
const STATUS: &[&str] = &["tercih durumum", "preference status"];
const RESET: &[&str] = &["tercih sıfırla", "tercih sifirla", "preference reset"];
const HELP: &[&str] = &["tercih yardım", "tercih yardim", "preference help"];

const SAVE_USAGE: &str = "Biçim: tercih kaydet <tip>: <değer>";
const DELETE_USAGE: &str = "Biçim: tercih sil <tip>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceCommand {
    Grant,
    Revoke,
    Save { pref_type: String, value: String },
    Delete { pref_type: String },
    List,
    Status,
    Reset,
    Help,
    Usage(&'static str),
}

/// Quick check used before parsing: does the message talk about preferences at all?
pub fn mentions_preferences(text: &str) -> bool {
    let normalized = normalize(text);
    normalized.contains("tercih") || normalized.contains("preference")
}

pub fn parse_preference_command(text: &str) -> Option<PreferenceCommand> {
    let normalized = normalize(text);
    if contains_any(&normalized, REVOKE) {
        return Some(PreferenceCommand::Revoke);
    }
    if contains_any(&normalized, SAVE) {
        return Some(parse_save(text));
    }
    if let Some(rest) = after_phrase(&normalized, DELETE) {
        if rest.is_empty() {
            return Some(PreferenceCommand::Usage(DELETE_USAGE));
        }
        return Some(PreferenceCommand::Delete {
            pref_type: rest.to_string(),
        });
    }
    let command = if contains_any(&normalized, LIST) {
        PreferenceCommand::List
    } else if contains_any(&normalized, GRANT) {
        PreferenceCommand::Grant
    } else if contains_any(&normalized, STATUS) {
        PreferenceCommand::Status
    } else if contains_any(&normalized, RESET) {
        PreferenceCommand::Reset
    } else if contains_any(&normalized, HELP) {
        PreferenceCommand::Help
    } else {
        return None;
    };
    Some(command)
}

/// `tercih kaydet <tip>: <değer>`; the value keeps the user's casing.
fn parse_save(text: &str) -> PreferenceCommand {
    let Some((left, right)) = text.split_once(':') else {
        return PreferenceCommand::Usage(SAVE_USAGE);
    };
    let left = normalize(left);
    let pref_type = after_phrase(&left, SAVE).unwrap_or_default();
    let value = right.trim();
    if pref_type.is_empty() || value.is_empty() {
        return PreferenceCommand::Usage(SAVE_USAGE);
    }
    PreferenceCommand::Save {
        pref_type: pref_type.to_string(),
        value: value.to_string(),
    }
}

fn contains_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| normalized.contains(phrase))
}

fn after_phrase<'a>(normalized: &'a str, phrases: &[&str]) -> Option<&'a str> {
    phrases.iter().find_map(|phrase| {
        normalized
            .find(phrase)
            .map(|start| normalized[start + phrase.len()..].trim())
    })
}

/// Runs `command` for the sender against their own record and returns the reply text.
pub fn execute(
    consent: &ConsentLifecycle,
    command: &PreferenceCommand,
    scope: ScopeId,
    sender: PrincipalId,
    display_name: &str,
) -> String {
    match command {
        PreferenceCommand::Grant => {
            consent
                .request_consent_grant(scope, sender, sender, display_name)
                .message
        }
        PreferenceCommand::Revoke => consent.request_consent_revoke(scope, sender, sender).message,
        PreferenceCommand::Save { pref_type, value } => {
            consent
                .request_preference_write(scope, sender, sender, display_name, pref_type, value)
                .message
        }
        PreferenceCommand::Delete { pref_type } => {
            consent
                .request_preference_delete(scope, sender, sender, pref_type)
                .message
        }
        PreferenceCommand::Reset => consent.request_clear(scope, sender, sender).message,
        PreferenceCommand::List => list_text(consent, scope, sender, display_name),
        PreferenceCommand::Status => status_text(consent, scope, sender, display_name),
        PreferenceCommand::Help => help_text(),
        PreferenceCommand::Usage(usage) => (*usage).to_string(),
    }
}

fn list_text(
    consent: &ConsentLifecycle,
    scope: ScopeId,
    principal: PrincipalId,
    display_name: &str,
) -> String {
    let record = consent.read_preferences(scope, principal);
    match record.filter(|record| !record.preferences.is_empty()) {
        Some(record) => {
            let mut text = format!("{display_name} için kayıtlı tercihler:\n");
            for (pref_type, value) in &record.preferences {
                let _ = writeln!(text, "- {pref_type}: {value}");
            }
            text.trim_end().to_string()
        }
        None => format!("{display_name}, henüz kayıtlı bir tercihin yok."),
    }
}

fn status_text(
    consent: &ConsentLifecycle,
    scope: ScopeId,
    principal: PrincipalId,
    display_name: &str,
) -> String {
    let state = match consent.state(scope, principal) {
        ConsentState::ConsentActive => "verildi",
        ConsentState::ConsentWithdrawn => "geri alındı",
        ConsentState::NoRecord => "verilmedi",
    };
    let mut text = format!("{display_name} için tercih durumu\nOnay durumu: {state}\n");
    let record = consent
        .read_preferences(scope, principal)
        .filter(|record| !record.preferences.is_empty());
    match record {
        Some(record) => {
            text.push_str("Kayıtlı tercihler:\n");
            for (pref_type, value) in &record.preferences {
                let _ = writeln!(text, "- {pref_type}: {value}");
            }
        }
        None => text.push_str("Henüz kayıtlı tercih yok."),
    }
    text.trim_end().to_string()
}

pub fn help_text() -> String {
    let mut text = String::from(
        "Tercih komutları:\n\
         - tercih onayla: tercih kaydetme onayını ver\n\
         - tercih onayı geri al: onayı geri al ve tercihleri sil\n\
         - tercih durumum: onay ve tercih durumunu göster\n\
         - tercih kaydet <tip>: <değer>: yeni tercih kaydet\n\
         - tercih sil <tip>: bir tercihi sil\n\
         - tercihlerim: kayıtlı tercihleri göster\n\
         - tercih sıfırla: tercih kaydını tamamen sil\n\
         - tercih yardım: bu yardımı göster\n\nGeçerli tercihler:\n",
    );
    for line in allow_list_lines() {
        let _ = writeln!(text, "- {line}");
    }
    let _ = write!(
        text,
        "\nÖrnek: tercih kaydet hitap: sen\nTercih kaydetmeden önce \"{GRANT_COMMAND}\" yazarak onay vermelisiniz."
    );
    text
}
