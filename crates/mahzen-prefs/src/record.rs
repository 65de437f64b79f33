use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Chat identifier a record is namespaced under (negative for groups).
pub type ScopeId = i64;
/// User identifier owning a record.
pub type PrincipalId = i64;

/// Storage key, `"{scope}_{principal}"`.
pub fn record_key(scope: ScopeId, principal: PrincipalId) -> String {
    format!("{scope}_{principal}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub scope: ScopeId,
    pub principal: PrincipalId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub consent_given: bool,
    pub last_updated: i64,
    pub created_by: PrincipalId,
}

impl PreferenceRecord {
    /// A freshly consented record owned by `principal`.
    pub fn granted(
        scope: ScopeId,
        principal: PrincipalId,
        display_name: impl Into<String>,
        now_secs: i64,
    ) -> Self {
        Self {
            scope,
            principal,
            display_name: display_name.into(),
            preferences: BTreeMap::new(),
            consent_given: true,
            last_updated: now_secs,
            created_by: principal,
        }
    }

    pub fn key(&self) -> String {
        record_key(self.scope, self.principal)
    }

    pub fn is_owned_by(&self, principal: PrincipalId) -> bool {
        self.principal == principal && self.created_by == principal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_field_names() {
        let mut record = PreferenceRecord::granted(-100, 42, "ayse", 1_700_000_000);
        record
            .preferences
            .insert("dil".to_string(), "Eski Türkçe".to_string());

        let value = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(value["scope"], -100);
        assert_eq!(value["principal"], 42);
        assert_eq!(value["displayName"], "ayse");
        assert_eq!(value["consentGiven"], true);
        assert_eq!(value["lastUpdated"], 1_700_000_000_i64);
        assert_eq!(value["createdBy"], 42);
        assert_eq!(value["preferences"]["dil"], "Eski Türkçe");
        assert_eq!(record.key(), "-100_42");
    }
}
