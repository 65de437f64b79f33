use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    ConsentRequired,
    InvalidPreferenceValue,
    StorageCorrupt,
    StorageWriteFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::ConsentRequired => "consent_required",
            Self::InvalidPreferenceValue => "invalid_preference_value",
            Self::StorageCorrupt => "storage_corrupt",
            Self::StorageWriteFailure => "storage_write_failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    CrossPrincipalWrite,
    RecordIntegrityViolation,
}

impl fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrossPrincipalWrite => f.write_str("cross-principal write"),
            Self::RecordIntegrityViolation => f.write_str("record integrity violation"),
        }
    }
}

/// Which half of a `(type, value)` pair failed the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidField {
    Type,
    Value,
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Unauthorized: {0}")]
    Unauthorized(UnauthorizedReason),
    #[error("ConsentRequired: issue `{remedy}` before saving preferences")]
    ConsentRequired { remedy: &'static str },
    #[error("InvalidPreferenceValue: {detail}")]
    InvalidPreferenceValue {
        field: InvalidField,
        detail: String,
        user_message: String,
    },
    #[error("StorageCorrupt: failed to load {path}: {detail}")]
    StorageCorrupt { path: PathBuf, detail: String },
    #[error("StorageWriteFailure: failed to persist {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl PreferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::ConsentRequired { .. } => ErrorKind::ConsentRequired,
            Self::InvalidPreferenceValue { .. } => ErrorKind::InvalidPreferenceValue,
            Self::StorageCorrupt { .. } => ErrorKind::StorageCorrupt,
            Self::StorageWrite { .. } => ErrorKind::StorageWriteFailure,
        }
    }

    /// Text shown to the chat user. Never contains platform markup.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized(UnauthorizedReason::CrossPrincipalWrite) => {
                "Yetkisiz işlem: başkası adına tercih değiştirilemez. Herkes yalnızca kendi tercihlerini belirleyebilir.".to_string()
            }
            Self::Unauthorized(UnauthorizedReason::RecordIntegrityViolation) => {
                "Yetkisiz işlem: tercih kaydının sahipliği doğrulanamadı.".to_string()
            }
            Self::ConsentRequired { remedy } => format!(
                "Tercih kaydetmek için önce onay vermelisiniz. Onay vermek için \"{remedy}\" yazın."
            ),
            Self::InvalidPreferenceValue { user_message, .. } => user_message.clone(),
            Self::StorageCorrupt { .. } => {
                "Tercih kayıtları okunamadı; kayıtlar sıfırlandı.".to_string()
            }
            Self::StorageWrite { .. } => {
                "Tercih kaydedilemedi: depolama hatası. Lütfen daha sonra tekrar deneyin."
                    .to_string()
            }
        }
    }
}
