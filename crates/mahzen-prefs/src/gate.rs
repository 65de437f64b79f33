use crate::error::{PreferenceError, UnauthorizedReason};
use crate::record::{PreferenceRecord, PrincipalId};

/// Single choke point for every mutating preference operation.
///
/// Only the owner of a record may change it. There is no admin override.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationGate;

impl AuthorizationGate {
    /// Admits `acting` to mutate `target`'s record and hands back the current
    /// record. `load_current` is only called once the actor check has passed.
    pub fn admit<F>(
        &self,
        acting: PrincipalId,
        target: PrincipalId,
        load_current: F,
    ) -> Result<Option<PreferenceRecord>, PreferenceError>
    where
        F: FnOnce() -> Option<PreferenceRecord>,
    {
        if acting != target {
            return Err(PreferenceError::Unauthorized(
                UnauthorizedReason::CrossPrincipalWrite,
            ));
        }

        let current = load_current();
        if let Some(record) = &current
            && !record.is_owned_by(target)
        {
            return Err(PreferenceError::Unauthorized(
                UnauthorizedReason::RecordIntegrityViolation,
            ));
        }
        Ok(current)
    }
}
