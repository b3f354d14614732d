//! Shared fixtures for integration tests: a scripted attestation platform and
//! canned allow-list and registration bodies.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use ledger_acl::attestation::{
    AttestationEvidence, AttestationPlatform, AttestationResult, PlatformError, UvmEndorsements,
};
use ledger_acl::{AclConfig, Gateway, Identity, MemoryStore};

pub const MEASUREMENT: &[u8] = b"snp-measurement-v1";
pub const HOST_DATA: &[u8] = b"cce-policy-digest-v1";
pub const DID: &str = "did:x509:0:sha256:I__iuL25oXEVFdTP_aBLx_eT1RPHbCQ_ECBQfYZpt9s";
pub const FEED: &str = "ContainerPlat-AMD-UVM";
pub const ADMIN: &str = "admin";

pub fn measurement_b64() -> String {
    STANDARD.encode(MEASUREMENT)
}

pub fn host_data_b64() -> String {
    STANDARD.encode(HOST_DATA)
}

pub fn id(s: &str) -> Identity {
    Identity::new(s).unwrap()
}

/// Report data as an honest processor would produce it: SHA-256 of its
/// identity, zero-padded to the 64-byte SNP field.
pub fn report_data_for(identity: &Identity) -> Vec<u8> {
    let mut data = Sha256::digest(identity.as_bytes()).to_vec();
    data.resize(64, 0);
    data
}

pub fn result_for(identity: &Identity, svn: &str) -> AttestationResult {
    AttestationResult {
        measurement: MEASUREMENT.to_vec(),
        host_data: HOST_DATA.to_vec(),
        report_data: report_data_for(identity),
        uvm_endorsements: UvmEndorsements {
            did: DID.into(),
            feed: FEED.into(),
            svn: svn.into(),
        },
    }
}

pub fn policy_body(min_svn: &str) -> Value {
    json!({
        "uvm_endorsements": { "did": DID, "feed": FEED, "svn": min_svn },
        "measurement": [measurement_b64()],
        "policy": [host_data_b64()]
    })
}

pub fn registration_body() -> Value {
    json!({
        "attestation": STANDARD.encode(b"snp-report"),
        "platform_certificates": STANDARD.encode(b"vcek-chain"),
        "uvm_endorsements": STANDARD.encode(b"cose-sign1"),
    })
}

/// Platform double whose next verification outcome is set by the test.
pub struct ScriptedPlatform {
    outcome: Mutex<Result<AttestationResult, PlatformError>>,
    pub calls: Mutex<usize>,
}

impl ScriptedPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Err(PlatformError::Rejected("no outcome scripted".into()))),
            calls: Mutex::new(0),
        })
    }

    pub fn returns(&self, result: AttestationResult) {
        *self.outcome.lock().unwrap() = Ok(result);
    }

    pub fn rejects(&self, reason: &str) {
        *self.outcome.lock().unwrap() = Err(PlatformError::Rejected(reason.into()));
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl AttestationPlatform for ScriptedPlatform {
    fn platform_id(&self) -> &'static str {
        "scripted"
    }

    fn verify_evidence(
        &self,
        _evidence: &AttestationEvidence,
    ) -> Result<AttestationResult, PlatformError> {
        *self.calls.lock().unwrap() += 1;
        self.outcome.lock().unwrap().clone()
    }
}

/// A gateway over a fresh store where `admin` holds the policy write action
/// and the allow-list admits SVN >= `min_svn`.
pub fn setup(min_svn: &str) -> (Gateway, MemoryStore, Arc<ScriptedPlatform>) {
    let platform = ScriptedPlatform::new();
    let gateway = Gateway::new(&AclConfig::default(), platform.clone());
    let mut store = MemoryStore::new();
    store
        .transact(|tx| {
            gateway.define_role(tx, "administrator", ["/policy/write"])?;
            gateway.define_role(tx, "processor", ["/data/read"])?;
            gateway.assign_role(tx, &id(ADMIN), "administrator")?;
            gateway.set_attestation_policy(tx, &id(ADMIN), &policy_body(min_svn))
        })
        .unwrap();
    (gateway, store, platform)
}
