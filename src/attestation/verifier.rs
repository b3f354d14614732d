//! Adapter over the platform's evidence verification primitive, plus
//! registration request decoding.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use super::{AttestationEvidence, AttestationPlatform, AttestationResult};
use crate::error::{AclError, AclResult};

/// Registration body as submitted by a processor: three standard-base64
/// strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub attestation: String,
    pub platform_certificates: String,
    pub uvm_endorsements: String,
}

impl RegistrationRequest {
    /// Shape validation in field order: `attestation`,
    /// `platform_certificates`, `uvm_endorsements`.
    pub fn from_json(body: &Value) -> AclResult<Self> {
        Ok(Self {
            attestation: b64_field(body, "attestation")?,
            platform_certificates: b64_field(body, "platform_certificates")?,
            uvm_endorsements: b64_field(body, "uvm_endorsements")?,
        })
    }

    /// Base64-decodes every field.
    pub fn decode(&self) -> AclResult<AttestationEvidence> {
        let certs = &self.platform_certificates;
        Ok(AttestationEvidence {
            evidence: decode_field("attestation", &self.attestation)?,
            platform_endorsements: decode_field("platform_certificates", certs)?,
            uvm_endorsements: decode_field("uvm_endorsements", &self.uvm_endorsements)?,
        })
    }
}

fn b64_field(body: &Value, field: &str) -> AclResult<String> {
    match body.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => {
            let msg = format!("`{field}` must be a non-empty base64 string");
            Err(AclError::MalformedInput(msg))
        }
    }
}

fn decode_field(field: &str, value: &str) -> AclResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| AclError::MalformedInput(format!("`{field}` is not valid base64: {e}")))
}

/// Calls the platform primitive and maps its failures onto [`AclError`].
///
/// Fields of the returned [`AttestationResult`] are the platform's claims;
/// binding and policy checks happen downstream.
#[derive(Clone)]
pub struct AttestationVerifier {
    platform: Arc<dyn AttestationPlatform>,
}

impl std::fmt::Debug for AttestationVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationVerifier")
            .field("platform", &self.platform.platform_id())
            .finish()
    }
}

impl AttestationVerifier {
    pub fn new(platform: Arc<dyn AttestationPlatform>) -> Self {
        Self { platform }
    }

    pub fn platform_id(&self) -> &'static str {
        self.platform.platform_id()
    }

    pub fn verify(&self, evidence: &AttestationEvidence) -> AclResult<AttestationResult> {
        if evidence.evidence.is_empty() {
            return Err(AclError::MalformedInput("attestation evidence is empty".into()));
        }
        match self.platform.verify_evidence(evidence) {
            Ok(result) => {
                tracing::debug!(
                    platform = self.platform_id(),
                    "attestation evidence verified"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    platform = self.platform_id(),
                    error = %e,
                    "attestation evidence rejected"
                );
                Err(AclError::AttestationVerificationFailed(e.to_string()))
            }
        }
    }
}
