//! Report binding: ties verified evidence to the identity presenting it.
//!
//! A processor puts SHA-256 of its own identity in the report data before
//! requesting evidence. Without this check, any caller holding a copy of a
//! trusted processor's evidence could register under its own identity.
//!
//! The check accepts only when the leading 32 bytes of report data EQUAL the
//! expected digest. Inverting the comparison would admit every replayed
//! report and reject every honest one; both directions are pinned by tests.

use sha2::{Digest, Sha256};

use super::AttestationResult;
use crate::error::{AclError, AclResult};
use crate::identity::Identity;

/// Length of the bound prefix (a SHA-256 digest).
pub const REPORT_BINDING_LEN: usize = 32;

/// Verifies report-binding data against a caller identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportBindingCheck;

impl ReportBindingCheck {
    /// SHA-256 of the UTF-8 identity string.
    pub fn expected_digest(identity: &Identity) -> [u8; REPORT_BINDING_LEN] {
        let mut out = [0u8; REPORT_BINDING_LEN];
        out.copy_from_slice(&Sha256::digest(identity.as_bytes()));
        out
    }

    /// `true` iff the report data starts with the identity digest.
    pub fn binds_to(&self, result: &AttestationResult, identity: &Identity) -> bool {
        let expected = Self::expected_digest(identity);
        match result.report_data.get(..REPORT_BINDING_LEN) {
            Some(prefix) => eq_no_short_circuit(prefix, &expected),
            None => false,
        }
    }

    /// [`Self::binds_to`] as a typed result.
    pub fn check(&self, result: &AttestationResult, identity: &Identity) -> AclResult<()> {
        if self.binds_to(result, identity) {
            return Ok(());
        }
        let observed = &result.report_data[..result.report_data.len().min(REPORT_BINDING_LEN)];
        Err(AclError::ReportBindingMismatch {
            expected: hex::encode(Self::expected_digest(identity)),
            actual: hex::encode(observed),
        })
    }
}

fn eq_no_short_circuit(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
