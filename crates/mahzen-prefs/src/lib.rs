//! Consent-gated per-user preference storage.
//!
//! Every mutation goes through [`ConsentLifecycle`], which runs the
//! [`AuthorizationGate`], the allow-list [`validator`] and the consent state
//! machine before anything reaches the [`PreferenceStore`]. Reads are ungated.

pub mod consent;
pub mod error;
pub mod gate;
pub mod record;
pub mod store;
pub mod validator;

pub use consent::{ConsentLifecycle, ConsentState, GRANT_COMMAND, Grant, Outcome, Revocation};
pub use error::{ErrorKind, InvalidField, PreferenceError, UnauthorizedReason};
pub use gate::AuthorizationGate;
pub use record::{PreferenceRecord, PrincipalId, ScopeId, record_key};
pub use store::{PreferenceStore, StoreStats};
pub use validator::{PreferenceKind, Verdict, validate};
