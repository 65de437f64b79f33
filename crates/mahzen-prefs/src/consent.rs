use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{ErrorKind, PreferenceError};
use crate::gate::AuthorizationGate;
use crate::record::{PreferenceRecord, PrincipalId, ScopeId};
use crate::store::PreferenceStore;
use crate::validator::{self, PreferenceKind, normalize};

/// Command a user must send to move into [`ConsentState::ConsentActive`].
pub const GRANT_COMMAND: &str = "tercih onayla";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    NoRecord,
    ConsentWithdrawn,
    ConsentActive,
}

impl ConsentState {
    pub fn of(record: Option<&PreferenceRecord>) -> Self {
        match record {
            None => Self::NoRecord,
            Some(record) if record.consent_given => Self::ConsentActive,
            Some(_) => Self::ConsentWithdrawn,
        }
    }
}

/// Result of a request as shown to the caller. `message` is user-facing on
/// both success and failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
    pub error: Option<ErrorKind>,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(err: &PreferenceError) -> Self {
        Self {
            success: false,
            message: err.user_message(),
            error: Some(err.kind()),
        }
    }

    fn from_result<T>(
        result: Result<T, PreferenceError>,
        on_success: impl FnOnce(T) -> String,
    ) -> Self {
        match result {
            Ok(value) => Self::ok(on_success(value)),
            Err(err) => Self::failed(&err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub record: PreferenceRecord,
    /// Consent was already active when the lock was taken.
    pub was_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    pub was_active: bool,
    pub cleared: usize,
}

/// Grant/revoke/write/delete operations on preference records.
///
/// Each mutation runs authorize, validate, read, compute and persist while
/// holding the per-key lock of the target record.
pub struct ConsentLifecycle {
    store: Arc<PreferenceStore>,
    gate: AuthorizationGate,
}

impl ConsentLifecycle {
    pub fn new(store: Arc<PreferenceStore>) -> Self {
        Self {
            store,
            gate: AuthorizationGate,
        }
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn read_preferences(
        &self,
        scope: ScopeId,
        principal: PrincipalId,
    ) -> Option<PreferenceRecord> {
        self.store.get(scope, principal)
    }

    pub fn state(&self, scope: ScopeId, principal: PrincipalId) -> ConsentState {
        ConsentState::of(self.store.get(scope, principal).as_ref())
    }

    pub fn grant_consent(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
        display_name: &str,
    ) -> Result<Grant, PreferenceError> {
        self.store.with_key_locked(scope, target, || {
            let current = self.admit(scope, acting, target, "grant")?;
            let was_active = current.as_ref().is_some_and(|record| record.consent_given);
            let record = match current {
                Some(mut record) => {
                    // Re-granting never brings back cleared preferences.
                    if !record.consent_given {
                        record.preferences.clear();
                    }
                    record.consent_given = true;
                    record.display_name = display_name.to_string();
                    record.last_updated = now_secs();
                    record
                }
                None => PreferenceRecord::granted(scope, target, display_name, now_secs()),
            };
            self.store.upsert(record.clone())?;
            info!(scope, principal = target, "preference consent granted");
            Ok(Grant { record, was_active })
        })
    }

    pub fn revoke_consent(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
    ) -> Result<Revocation, PreferenceError> {
        self.store.with_key_locked(scope, target, || {
            let current = self.admit(scope, acting, target, "revoke")?;
            let Some(mut record) = current.filter(|record| record.consent_given) else {
                return Ok(Revocation {
                    was_active: false,
                    cleared: 0,
                });
            };
            let cleared = record.preferences.len();
            record.consent_given = false;
            record.preferences.clear();
            record.last_updated = now_secs();
            self.store.upsert(record)?;
            info!(
                scope,
                principal = target,
                cleared,
                "preference consent revoked"
            );
            Ok(Revocation {
                was_active: true,
                cleared,
            })
        })
    }

    pub fn write_preference(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
        display_name: &str,
        pref_type: &str,
        value: &str,
    ) -> Result<PreferenceRecord, PreferenceError> {
        self.store.with_key_locked(scope, target, || {
            let current = self.admit(scope, acting, target, "write")?;
            let kind = validator::check(pref_type, value)?;
            let mut record = match current {
                Some(record) if record.consent_given => record,
                _ => {
                    return Err(PreferenceError::ConsentRequired {
                        remedy: GRANT_COMMAND,
                    });
                }
            };
            record.display_name = display_name.to_string();
            record
                .preferences
                .insert(kind.as_str().to_string(), value.trim().to_string());
            record.last_updated = now_secs();
            self.store.upsert(record.clone())?;
            info!(
                scope,
                principal = target,
                pref_type = kind.as_str(),
                "preference saved"
            );
            Ok(record)
        })
    }

    /// Returns whether an entry was removed.
    pub fn delete_preference(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
        pref_type: &str,
    ) -> Result<bool, PreferenceError> {
        self.store.with_key_locked(scope, target, || {
            let current = self.admit(scope, acting, target, "delete")?;
            let key = preference_key(pref_type);
            let Some(mut record) = current.filter(|record| record.preferences.contains_key(&key))
            else {
                return Ok(false);
            };
            record.preferences.remove(&key);
            record.last_updated = now_secs();
            self.store.upsert(record)?;
            info!(scope, principal = target, pref_type = %key, "preference deleted");
            Ok(true)
        })
    }

    /// Physically removes the target's record. Returns whether one existed.
    pub fn clear_principal(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
    ) -> Result<bool, PreferenceError> {
        self.store.with_key_locked(scope, target, || {
            self.admit(scope, acting, target, "clear")?;
            let removed = self.store.remove_record(scope, target)?;
            if removed {
                info!(scope, principal = target, "preference record removed");
            }
            Ok(removed)
        })
    }

    pub fn request_consent_grant(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
        display_name: &str,
    ) -> Outcome {
        Outcome::from_result(
            self.grant_consent(scope, acting, target, display_name),
            |grant| {
                if grant.was_active {
                    "Tercih kaydetme onayınız zaten verilmiş.".to_string()
                } else {
                    "Tercih kaydetme onayınız verildi. Artık tercihlerinizi kaydedebilirim."
                        .to_string()
                }
            },
        )
    }

    pub fn request_consent_revoke(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
    ) -> Outcome {
        Outcome::from_result(self.revoke_consent(scope, acting, target), |revocation| {
            if revocation.was_active {
                format!(
                    "Tercih kaydetme onayınız geri alındı ve {} tercihiniz silindi.",
                    revocation.cleared
                )
            } else {
                "Aktif bir tercih onayınız yok; değişiklik yapılmadı.".to_string()
            }
        })
    }

    pub fn request_preference_write(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
        display_name: &str,
        pref_type: &str,
        value: &str,
    ) -> Outcome {
        Outcome::from_result(
            self.write_preference(scope, acting, target, display_name, pref_type, value),
            |_| {
                format!(
                    "Tercih kaydedildi: {} = {}",
                    preference_key(pref_type),
                    value.trim()
                )
            },
        )
    }

    pub fn request_preference_delete(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
        pref_type: &str,
    ) -> Outcome {
        let key = preference_key(pref_type);
        Outcome::from_result(
            self.delete_preference(scope, acting, target, pref_type),
            |removed| {
                if removed {
                    format!("Tercih silindi: {key}")
                } else {
                    format!("Kayıtlı bir '{key}' tercihiniz yok; değişiklik yapılmadı.")
                }
            },
        )
    }

    pub fn request_clear(&self, scope: ScopeId, acting: PrincipalId, target: PrincipalId) -> Outcome {
        Outcome::from_result(self.clear_principal(scope, acting, target), |removed| {
            if removed {
                "Tercih kaydınız tamamen silindi.".to_string()
            } else {
                "Silinecek bir tercih kaydınız yok.".to_string()
            }
        })
    }

    /// Bulk removal of every record in `scope`. Callers decide who may do this.
    pub fn clear_scope(&self, scope: ScopeId) -> Outcome {
        let result = self.store.remove_all_for_scope(scope);
        if let Ok(removed) = &result {
            info!(scope, removed, "preference records cleared for scope");
        }
        Outcome::from_result(result, |removed| {
            format!("Bu sohbetteki {removed} tercih kaydı silindi.")
        })
    }

    fn admit(
        &self,
        scope: ScopeId,
        acting: PrincipalId,
        target: PrincipalId,
        operation: &str,
    ) -> Result<Option<PreferenceRecord>, PreferenceError> {
        self.gate
            .admit(acting, target, || self.store.get(scope, target))
            .inspect_err(|err| {
                warn!(scope, acting, target, operation, "preference request denied: {err}");
            })
    }
}

/// Canonical map key for a user-supplied type name.
fn preference_key(pref_type: &str) -> String {
    PreferenceKind::parse(pref_type)
        .map(|kind| kind.as_str().to_string())
        .unwrap_or_else(|| normalize(pref_type))
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> (tempfile::TempDir, ConsentLifecycle) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PreferenceStore::open(dir.path().join("preferences.json"));
        (dir, ConsentLifecycle::new(Arc::new(store)))
    }

    #[test]
    fn state_follows_grant_and_revoke() {
        let (_dir, consent) = lifecycle();
        assert_eq!(consent.state(-1, 7), ConsentState::NoRecord);

        consent.grant_consent(-1, 7, 7, "veli").expect("grant");
        assert_eq!(consent.state(-1, 7), ConsentState::ConsentActive);

        let revocation = consent.revoke_consent(-1, 7, 7).expect("revoke");
        assert!(revocation.was_active);
        assert_eq!(consent.state(-1, 7), ConsentState::ConsentWithdrawn);
    }

    #[test]
    fn second_grant_reports_already_active_and_refreshes_name() {
        let (_dir, consent) = lifecycle();
        assert!(consent.request_consent_grant(-1, 7, 7, "veli").success);

        let again = consent.request_consent_grant(-1, 7, 7, "Veli Bey");
        assert!(again.success);
        assert!(again.message.contains("zaten"));
        let record = consent.read_preferences(-1, 7).expect("record");
        assert_eq!(record.display_name, "Veli Bey");
    }

    #[test]
    fn revoke_without_active_consent_creates_nothing() {
        let (_dir, consent) = lifecycle();
        let outcome = consent.request_consent_revoke(-1, 7, 7);
        assert!(outcome.success);
        assert!(consent.read_preferences(-1, 7).is_none());
    }

    #[test]
    fn consent_required_message_names_the_grant_command() {
        let (_dir, consent) = lifecycle();
        let outcome = consent.request_preference_write(-1, 7, 7, "veli", "ton", "ciddi");
        assert!(!outcome.success);
        assert_eq!(outcome.error, Some(ErrorKind::ConsentRequired));
        assert!(outcome.message.contains(GRANT_COMMAND));
    }

    #[test]
    fn write_stores_canonical_type_and_trimmed_value() {
        let (_dir, consent) = lifecycle();
        consent.grant_consent(-1, 7, 7, "veli").expect("grant");
        let outcome = consent.request_preference_write(-1, 7, 7, "veli", "Sair", "  Orhan Veli ");
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.message, "Tercih kaydedildi: şair = Orhan Veli");

        let record = consent.read_preferences(-1, 7).expect("record");
        assert_eq!(
            record.preferences.get("şair").map(String::as_str),
            Some("Orhan Veli")
        );
    }

    #[test]
    fn unauthorized_is_reported_before_validation() {
        let (_dir, consent) = lifecycle();
        let outcome = consent.request_preference_write(-1, 8, 7, "x", "renk", "mavi");
        assert_eq!(outcome.error, Some(ErrorKind::Unauthorized));
    }

    #[test]
    fn clear_scope_only_touches_that_scope() {
        let (_dir, consent) = lifecycle();
        consent.grant_consent(-1, 7, 7, "veli").expect("grant");
        consent.grant_consent(-1, 8, 8, "ayse").expect("grant");
        consent.grant_consent(-2, 7, 7, "veli").expect("grant");

        let outcome = consent.clear_scope(-1);
        assert!(outcome.success);
        assert!(outcome.message.contains('2'));
        assert!(consent.read_preferences(-1, 7).is_none());
        assert!(consent.read_preferences(-2, 7).is_some());
    }
}
