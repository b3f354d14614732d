//! Error types for authorization and processor trust decisions.
//!
//! Every public operation reports failure as an [`AclError`]. Variants carry
//! enough context for an operator to act on (which identity, which action,
//! which allow-list field) but never raw evidence bytes.

use thiserror::Error;

use crate::store::StoreError;

/// Why a processor's attested metadata fails the current allow-list.
///
/// Checked in declaration order; the first failing field is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// UVM issuer DID differs from the policy.
    #[error("DID did not match: expected `{expected}`, attested `{actual}`")]
    DidMismatch { expected: String, actual: String },

    /// UVM feed differs from the policy.
    #[error("feed did not match: expected `{expected}`, attested `{actual}`")]
    FeedMismatch { expected: String, actual: String },

    /// UVM security version is below the policy minimum.
    #[error("SVN is too old: attested {actual} < minimum {minimum}")]
    SvnTooOld { minimum: u64, actual: u64 },

    /// An SVN value is not a decimal unsigned integer.
    #[error("SVN `{0}` is not a decimal unsigned integer")]
    SvnUnparseable(String),

    /// Measurement is not on the allow-list.
    #[error("measurement `{0}` is not allowed")]
    MeasurementNotAllowed(String),

    /// Host data (security policy digest) is not on the allow-list.
    #[error("policy `{0}` is not allowed")]
    HostDataNotAllowed(String),
}

/// Errors returned by the ACL core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    /// The identity holds no role granting the action.
    #[error("{identity} is not authorized to perform `{action}`")]
    AuthorizationDenied { identity: String, action: String },

    /// The caller's credentials could not be turned into an identity.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// No attestation policy has been configured yet.
    #[error("no attestation policy configured")]
    PolicyNotFound,

    /// A request body or stored record has the wrong shape.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The platform rejected the attestation evidence.
    #[error("attestation verification failed: {0}")]
    AttestationVerificationFailed(String),

    /// The evidence is not bound to the caller's identity.
    #[error("report data does not bind the caller: expected {expected}, got {actual}")]
    ReportBindingMismatch { expected: String, actual: String },

    /// Attested metadata is not on the current allow-list.
    #[error("attested metadata rejected by policy: {0}")]
    PolicyMismatch(#[from] PolicyViolation),

    /// Trust check on an identity with no processor record.
    #[error("processor {0} is not registered")]
    NotRegistered(String),

    /// No user policy stored for the identity.
    #[error("no policy found for {0}")]
    UserPolicyNotFound(String),

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl AclError {
    /// Stable numeric code for this error.
    ///
    /// - 4000-4099: caller/authorization
    /// - 4100-4199: input and configuration
    /// - 4200-4299: attestation
    /// - 4300-4399: registry lookups
    /// - 5000: storage
    pub fn code(&self) -> u16 {
        match self {
            AclError::AuthorizationDenied { .. } => 4000,
            AclError::Unauthenticated(_) => 4001,
            AclError::MalformedInput(_) => 4100,
            AclError::PolicyNotFound => 4101,
            AclError::AttestationVerificationFailed(_) => 4200,
            AclError::ReportBindingMismatch { .. } => 4201,
            AclError::PolicyMismatch(_) => 4202,
            AclError::NotRegistered(_) => 4300,
            AclError::UserPolicyNotFound(_) => 4301,
            AclError::Storage(_) => 5000,
        }
    }
}

impl From<StoreError> for AclError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { .. } => AclError::MalformedInput(err.to_string()),
            StoreError::Backend(msg) => AclError::Storage(msg),
        }
    }
}

pub type AclResult<T> = std::result::Result<T, AclError>;
