//! Closed allow-list of preference types and their accepted values.

use crate::error::{InvalidField, PreferenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKind {
    Hitap,
    Dil,
    Ton,
    Kisilik,
    Ilgi,
    Sair,
}

impl PreferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hitap => "hitap",
            Self::Dil => "dil",
            Self::Ton => "ton",
            Self::Kisilik => "kişilik",
            Self::Ilgi => "ilgi",
            Self::Sair => "şair",
        }
    }

    pub fn all() -> &'static [PreferenceKind] {
        &[
            Self::Hitap,
            Self::Dil,
            Self::Ton,
            Self::Kisilik,
            Self::Ilgi,
            Self::Sair,
        ]
    }

    pub fn parse(value: &str) -> Option<Self> {
        comparison_forms(value)
            .iter()
            .find_map(|form| match form.as_str() {
                "hitap" => Some(Self::Hitap),
                "dil" => Some(Self::Dil),
                "ton" => Some(Self::Ton),
                "kişilik" | "kisilik" => Some(Self::Kisilik),
                "ilgi" => Some(Self::Ilgi),
                "şair" | "sair" => Some(Self::Sair),
                _ => None,
            })
    }

    pub fn accepted_values(self) -> &'static [&'static str] {
        match self {
            Self::Hitap => &["sen", "siz", "efendim", "kanka", "dost"],
            Self::Dil => &["eski türkçe", "modern türkçe", "arapça", "farsça"],
            Self::Ton => &["şakacı", "ciddi", "romantik", "nazik"],
            Self::Kisilik => &["gururlu", "itaatkar", "şakacı", "saygılı"],
            Self::Ilgi => &["şiir", "müzik", "kitap", "sanat", "edebiyat"],
            Self::Sair => &[
                "nazım hikmet",
                "yahya kemal",
                "orhan veli",
                "cemal süreya",
                "attila ilhan",
                "turgut uyar",
                "edip cansever",
            ],
        }
    }

    pub fn accepts(self, value: &str) -> bool {
        let forms = comparison_forms(value);
        self.accepted_values()
            .iter()
            .any(|allowed| forms.iter().any(|form| form == allowed))
    }
}

/// Result of checking a `(type, value)` pair against the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub accepted: bool,
    pub reason: String,
}

/// Pure allow-list check. Knows nothing about who is asking.
pub fn validate(pref_type: &str, value: &str) -> Verdict {
    match check(pref_type, value) {
        Ok(kind) => Verdict {
            accepted: true,
            reason: format!("'{}' için '{}' kabul edildi.", kind.as_str(), value.trim()),
        },
        Err(err) => Verdict {
            accepted: false,
            reason: err.user_message(),
        },
    }
}

pub(crate) fn check(pref_type: &str, value: &str) -> Result<PreferenceKind, PreferenceError> {
    let Some(kind) = PreferenceKind::parse(pref_type) else {
        let valid = PreferenceKind::all()
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(PreferenceError::InvalidPreferenceValue {
            field: InvalidField::Type,
            detail: format!("unknown preference type '{}'", pref_type.trim()),
            user_message: format!(
                "Geçersiz tercih türü: '{}'. Geçerli türler: {valid}",
                pref_type.trim()
            ),
        });
    };
    if !kind.accepts(value) {
        return Err(PreferenceError::InvalidPreferenceValue {
            field: InvalidField::Value,
            detail: format!(
                "value '{}' is not allowed for type '{}'",
                value.trim(),
                kind.as_str()
            ),
            user_message: format!(
                "'{}' değeri '{}' için geçerli değil. Geçerli değerler: {}",
                value.trim(),
                kind.as_str(),
                kind.accepted_values().join(", ")
            ),
        });
    }
    Ok(kind)
}

/// Trim, collapse inner whitespace and lower-case. The combining dot left
/// behind by lower-casing Turkish `İ` is dropped so `İ` compares as `i`.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace('\u{0307}', "")
}

/// Plain and Turkish lower-casing of `raw`. Dotless capital `I` lowers to
/// `ı` in Turkish, so `SAYGILI` only matches `saygılı` in the second form,
/// while ASCII input such as `KISILIK` still needs the first.
fn comparison_forms(raw: &str) -> [String; 2] {
    [normalize(raw), normalize(&raw.replace('I', "ı"))]
}

/// One line per type, e.g. `hitap: sen, siz, ...`.
pub fn allow_list_lines() -> Vec<String> {
    PreferenceKind::all()
        .iter()
        .map(|kind| format!("{}: {}", kind.as_str(), kind.accepted_values().join(", ")))
        .collect()
}
