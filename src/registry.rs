//! Processor trust registry.
//!
//! A processor registers by presenting attestation evidence. The evidence
//! must verify, must be bound to the caller's identity, and the attested
//! metadata must satisfy the current allow-list. Only then is the metadata
//! stored, keyed by identity.
//!
//! Trust is never cached. [`ProcessorTrustRegistry::is_valid`] re-evaluates
//! the stored metadata against whatever allow-list is current, so tightening
//! the allow-list revokes processors that no longer match, and loosening it
//! restores them.

use crate::attestation::{
    AttestationEvidence, AttestationPolicyStore, AttestationVerifier, ProcessorMetadata,
    ReportBindingCheck,
};
use crate::error::{AclError, AclResult};
use crate::identity::Identity;
use crate::store::{read_json, write_json, KvStore, StoreError};

/// Per-processor attested metadata, as stored.
pub type ProcessorRecord = ProcessorMetadata;

#[derive(Debug, Clone)]
pub struct ProcessorTrustRegistry {
    table: String,
    policies: AttestationPolicyStore,
    binding: ReportBindingCheck,
}

impl ProcessorTrustRegistry {
    pub fn new(table: impl Into<String>, policies: AttestationPolicyStore) -> Self {
        Self {
            table: table.into(),
            policies,
            binding: ReportBindingCheck,
        }
    }

    pub fn policies(&self) -> &AttestationPolicyStore {
        &self.policies
    }

    /// Verifies `evidence` for `identity` and stores the attested metadata.
    ///
    /// Stops at the first failing step (verification, binding, policy).
    /// Nothing is written unless every step passes. A later successful
    /// registration overwrites the earlier record.
    pub fn register<S>(
        &self,
        store: &mut S,
        verifier: &AttestationVerifier,
        identity: &Identity,
        evidence: &AttestationEvidence,
    ) -> AclResult<ProcessorRecord>
    where
        S: KvStore + ?Sized,
    {
        let result = verifier.verify(evidence)?;

        if let Err(e) = self.binding.check(&result, identity) {
            tracing::warn!(processor = %identity, "evidence is not bound to the caller");
            return Err(e);
        }

        let metadata = result.metadata();
        let policy = self.policies.get_policy(&*store)?;
        if let Err(violation) = policy.evaluate(&metadata) {
            tracing::warn!(processor = %identity, %violation, "attested metadata rejected");
            return Err(violation.into());
        }

        write_json(store, &self.table, identity.as_str(), &metadata)?;
        tracing::info!(
            processor = %identity,
            platform = verifier.platform_id(),
            svn = %metadata.uvm_endorsements.svn,
            "processor registered"
        );
        Ok(metadata)
    }

    /// Whether `identity` is registered and its metadata satisfies the
    /// current allow-list. Any failure, including storage errors, is `false`.
    pub fn is_valid<S>(&self, store: &S, identity: &Identity) -> bool
    where
        S: KvStore + ?Sized,
    {
        match self.check(store, identity) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(processor = %identity, reason = %e, "processor not trusted");
                false
            }
        }
    }

    /// The reason behind [`Self::is_valid`]: the stored record when trusted,
    /// otherwise why not.
    pub fn check<S>(&self, store: &S, identity: &Identity) -> AclResult<ProcessorRecord>
    where
        S: KvStore + ?Sized,
    {
        let record = self
            .record(store, identity)?
            .ok_or_else(|| AclError::NotRegistered(identity.to_string()))?;
        let policy = self.policies.get_policy(store)?;
        policy.evaluate(&record)?;
        Ok(record)
    }

    /// Whether a record exists, regardless of current validity.
    pub fn is_registered<S>(&self, store: &S, identity: &Identity) -> AclResult<bool>
    where
        S: KvStore + ?Sized,
    {
        Ok(store.has(&self.table, identity.as_str())?)
    }

    pub fn record<S>(&self, store: &S, identity: &Identity) -> AclResult<Option<ProcessorRecord>>
    where
        S: KvStore + ?Sized,
    {
        match read_json(store, &self.table, identity.as_str()) {
            Ok(record) => Ok(record),
            Err(e @ StoreError::Corrupt { .. }) => {
                tracing::warn!(
                    processor = %identity,
                    error = %e,
                    "stored processor record is unreadable"
                );
                Err(AclError::MalformedInput(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every registered identity, trusted or not, in key order.
    pub fn registered<S>(&self, store: &S) -> AclResult<Vec<Identity>>
    where
        S: KvStore + ?Sized,
    {
        store
            .keys(&self.table)?
            .into_iter()
            .map(Identity::new)
            .collect()
    }
}
