//! Attestation-gated processor admission.
//!
//! Hardware evidence verification is performed by the ledger platform, not by
//! this crate. [`AttestationPlatform`] is the seam: it takes raw evidence
//! plus endorsements and returns the attested fields. Everything downstream
//! treats those fields as untrusted until they pass the binding and policy
//! checks.
//!
//! ## Module Structure
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`verifier`] | Adapter over the platform primitive; request decoding |
//! | [`binding`] | Report data must equal SHA-256 of the caller identity |
//! | [`policy`] | Administrator allow-list and its storage |

pub mod binding;
pub mod policy;
pub mod verifier;

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use binding::ReportBindingCheck;
pub use policy::{AttestationPolicy, AttestationPolicyStore};
pub use verifier::{AttestationVerifier, RegistrationRequest};

/// UVM endorsement parameters: who issued the utility VM image, from which
/// feed, at which security version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UvmEndorsements {
    pub did: String,
    pub feed: String,
    /// Decimal security version number.
    pub svn: String,
}

/// Fields the platform extracted from verified evidence.
#[derive(Clone, PartialEq, Eq)]
pub struct AttestationResult {
    pub measurement: Vec<u8>,
    /// Host data: digest of the security policy the processor runs under.
    pub host_data: Vec<u8>,
    /// Report data chosen by the attester; binds the report to a caller.
    pub report_data: Vec<u8>,
    pub uvm_endorsements: UvmEndorsements,
}

impl fmt::Debug for AttestationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationResult")
            .field("measurement", &STANDARD.encode(&self.measurement))
            .field("host_data", &STANDARD.encode(&self.host_data))
            .field(
                "report_data",
                &format_args!("[{} bytes]", self.report_data.len()),
            )
            .field("uvm_endorsements", &self.uvm_endorsements)
            .finish()
    }
}

impl AttestationResult {
    /// The persisted form: measurement and host data as standard base64.
    pub fn metadata(&self) -> ProcessorMetadata {
        ProcessorMetadata {
            uvm_endorsements: self.uvm_endorsements.clone(),
            measurement: STANDARD.encode(&self.measurement),
            policy: STANDARD.encode(&self.host_data),
        }
    }
}

/// Attested metadata as stored per processor and compared against the
/// allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorMetadata {
    pub uvm_endorsements: UvmEndorsements,
    /// Base64 measurement.
    pub measurement: String,
    /// Base64 host data.
    pub policy: String,
}

/// Raw evidence submitted with a registration. Never persisted.
#[derive(Clone)]
pub struct AttestationEvidence {
    pub evidence: Vec<u8>,
    pub platform_endorsements: Vec<u8>,
    pub uvm_endorsements: Vec<u8>,
}

impl fmt::Debug for AttestationEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AttestationEvidence(evidence: {} bytes, platform: {} bytes, uvm: {} bytes)",
            self.evidence.len(),
            self.platform_endorsements.len(),
            self.uvm_endorsements.len()
        )
    }
}

/// Failure reported by the platform's verification primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// Evidence or endorsements could not be parsed.
    #[error("decode error: {0}")]
    Decode(String),
    /// Evidence parsed but did not verify (bad signature, untrusted chain).
    #[error("{0}")]
    Rejected(String),
    /// The platform cannot verify this evidence type.
    #[error("unsupported evidence: {0}")]
    Unsupported(String),
}

/// The platform's hardware attestation verification primitive.
pub trait AttestationPlatform: Send + Sync {
    /// Short identifier for logs (e.g. `"sev-snp"`).
    fn platform_id(&self) -> &'static str;

    /// Verifies evidence against platform and UVM endorsements.
    fn verify_evidence(
        &self,
        evidence: &AttestationEvidence,
    ) -> Result<AttestationResult, PlatformError>;
}

/// Platform for hosts without a verification primitive (e.g. offline
/// tooling). Every verification returns [`PlatformError::Unsupported`], so
/// no processor can register through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePlatform;

impl AttestationPlatform for UnavailablePlatform {
    fn platform_id(&self) -> &'static str {
        "unavailable"
    }

    fn verify_evidence(
        &self,
        _evidence: &AttestationEvidence,
    ) -> Result<AttestationResult, PlatformError> {
        Err(PlatformError::Unsupported("no attestation platform on this host".into()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic platform double for unit tests.

    use std::sync::Mutex;

    use sha2::{Digest, Sha256};

    use super::*;
    use crate::identity::Identity;

    pub const MEASUREMENT: &[u8] = b"measurement-m1";
    pub const HOST_DATA: &[u8] = b"host-data-p1";

    pub fn m1() -> String {
        STANDARD.encode(MEASUREMENT)
    }

    pub fn p1() -> String {
        STANDARD.encode(HOST_DATA)
    }

    pub fn uvm(svn: &str) -> UvmEndorsements {
        UvmEndorsements {
            did: "D1".into(),
            feed: "F1".into(),
            svn: svn.into(),
        }
    }

    /// A result bound to `identity`, padded to a 64-byte report data field.
    pub fn result_for(identity: &Identity) -> AttestationResult {
        let mut report_data = Sha256::digest(identity.as_bytes()).to_vec();
        report_data.resize(64, 0);
        AttestationResult {
            measurement: MEASUREMENT.to_vec(),
            host_data: HOST_DATA.to_vec(),
            report_data,
            uvm_endorsements: uvm("5"),
        }
    }

    pub fn evidence() -> AttestationEvidence {
        AttestationEvidence {
            evidence: b"evidence".to_vec(),
            platform_endorsements: b"certs".to_vec(),
            uvm_endorsements: b"uvm".to_vec(),
        }
    }

    /// Returns a fixed outcome and counts calls.
    pub struct FixedPlatform {
        outcome: Result<AttestationResult, PlatformError>,
        pub calls: Mutex<usize>,
    }

    impl FixedPlatform {
        pub fn accepting(result: AttestationResult) -> Self {
            Self {
                outcome: Ok(result),
                calls: Mutex::new(0),
            }
        }

        pub fn rejecting(reason: &str) -> Self {
            Self {
                outcome: Err(PlatformError::Rejected(reason.to_string())),
                calls: Mutex::new(0),
            }
        }
    }

    impl AttestationPlatform for FixedPlatform {
        fn platform_id(&self) -> &'static str {
            "fixed"
        }

        fn verify_evidence(
            &self,
            _evidence: &AttestationEvidence,
        ) -> Result<AttestationResult, PlatformError> {
            if let Ok(mut n) = self.calls.lock() {
                *n += 1;
            }
            self.outcome.clone()
        }
    }
}
