//! Processor allow-list.
//!
//! The allow-list is a singleton record. It is read fresh on every trust
//! check, so narrowing it revokes previously admitted processors without any
//! per-processor write.
//!
//! ## Matching
//!
//! A processor's attested metadata is accepted iff, in this order:
//! 1. UVM `did` equals the policy's `did`
//! 2. UVM `feed` equals the policy's `feed`
//! 3. UVM `svn`, parsed as an unsigned integer, is at least the policy's `svn`
//! 4. `measurement` is in the policy's `measurement` list
//! 5. `policy` (host data) is in the policy's `policy` list
//!
//! SVNs are compared numerically. Comparing the decimal strings would rank
//! `"10"` below `"9"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ProcessorMetadata, UvmEndorsements};
use crate::error::{AclError, AclResult, PolicyViolation};
use crate::store::{read_json, write_json, KvStore, StoreError};

/// Key of the singleton policy record.
pub const SINGLETON_KEY: &str = "default";

/// Administrator-defined allow-list for processor admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationPolicy {
    /// Required issuer and feed; `svn` is the minimum accepted.
    pub uvm_endorsements: UvmEndorsements,
    /// Accepted base64 measurements.
    pub measurement: Vec<String>,
    /// Accepted base64 host data values.
    pub policy: Vec<String>,
}

impl AttestationPolicy {
    /// Validates an untyped request body field by field, reporting the first
    /// problem found.
    pub fn from_json(body: &Value) -> AclResult<Self> {
        let uvm = body
            .get("uvm_endorsements")
            .filter(|v| v.is_object())
            .ok_or_else(|| malformed("missing or invalid uvm_endorsements"))?;
        let did = required_str(uvm, "did", "uvm did")?;
        let feed = required_str(uvm, "feed", "uvm feed")?;
        let svn = required_str(uvm, "svn", "uvm svn")?;
        let measurement = string_list(body, "measurement")?;
        let policy = string_list(body, "policy")?;

        let parsed = Self {
            uvm_endorsements: UvmEndorsements { did, feed, svn },
            measurement,
            policy,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Checks a typed policy: non-empty UVM fields, decimal `svn`, and
    /// non-empty allow-list entries. Empty lists are allowed; they admit
    /// nothing.
    pub fn validate(&self) -> AclResult<()> {
        let uvm = &self.uvm_endorsements;
        if uvm.did.is_empty() {
            return Err(malformed("invalid uvm did"));
        }
        if uvm.feed.is_empty() {
            return Err(malformed("invalid uvm feed"));
        }
        if parse_svn(&uvm.svn).is_none() {
            return Err(malformed("invalid uvm svn: not an unsigned integer"));
        }
        if self.measurement.iter().any(String::is_empty) {
            return Err(malformed("invalid or missing measurement"));
        }
        if self.policy.iter().any(String::is_empty) {
            return Err(malformed("invalid or missing policy"));
        }
        Ok(())
    }

    /// Matches attested metadata against this policy.
    pub fn evaluate(&self, attested: &ProcessorMetadata) -> Result<(), PolicyViolation> {
        let want = &self.uvm_endorsements;
        let got = &attested.uvm_endorsements;

        if got.did != want.did {
            return Err(PolicyViolation::DidMismatch {
                expected: want.did.clone(),
                actual: got.did.clone(),
            });
        }
        if got.feed != want.feed {
            return Err(PolicyViolation::FeedMismatch {
                expected: want.feed.clone(),
                actual: got.feed.clone(),
            });
        }
        let minimum = svn_of(want)?;
        let actual = svn_of(got)?;
        if actual < minimum {
            return Err(PolicyViolation::SvnTooOld { minimum, actual });
        }
        if !self.measurement.contains(&attested.measurement) {
            return Err(PolicyViolation::MeasurementNotAllowed(attested.measurement.clone()));
        }
        if !self.policy.contains(&attested.policy) {
            return Err(PolicyViolation::HostDataNotAllowed(attested.policy.clone()));
        }
        Ok(())
    }
}

/// Parses a decimal SVN. Signs, whitespace, and empty strings are rejected.
pub fn parse_svn(svn: &str) -> Option<u64> {
    if svn.is_empty() || !svn.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    svn.parse().ok()
}

fn svn_of(uvm: &UvmEndorsements) -> Result<u64, PolicyViolation> {
    parse_svn(&uvm.svn).ok_or_else(|| PolicyViolation::SvnUnparseable(uvm.svn.clone()))
}

fn malformed(msg: &str) -> AclError {
    AclError::MalformedInput(msg.to_string())
}

fn required_str(obj: &Value, field: &str, label: &str) -> AclResult<String> {
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(AclError::MalformedInput(format!("invalid {label}"))),
    }
}

fn string_list(body: &Value, field: &str) -> AclResult<Vec<String>> {
    let err = || AclError::MalformedInput(format!("invalid or missing {field}"));
    let items = body.get(field).and_then(Value::as_array).ok_or_else(err)?;
    items
        .iter()
        .map(|v| match v.as_str() {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(err()),
        })
        .collect()
}

/// Reads and writes the singleton allow-list record.
#[derive(Debug, Clone)]
pub struct AttestationPolicyStore {
    table: String,
}

impl AttestationPolicyStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Validates and stores `policy`, replacing any previous one. Nothing is
    /// written if validation fails.
    pub fn set_policy<S>(&self, store: &mut S, policy: &AttestationPolicy) -> AclResult<()>
    where
        S: KvStore + ?Sized,
    {
        policy.validate()?;
        write_json(store, &self.table, SINGLETON_KEY, policy)?;
        tracing::info!(
            did = %policy.uvm_endorsements.did,
            feed = %policy.uvm_endorsements.feed,
            min_svn = %policy.uvm_endorsements.svn,
            measurements = policy.measurement.len(),
            policies = policy.policy.len(),
            "attestation policy updated"
        );
        Ok(())
    }

    /// The current allow-list.
    pub fn get_policy<S>(&self, store: &S) -> AclResult<AttestationPolicy>
    where
        S: KvStore + ?Sized,
    {
        match read_json(store, &self.table, SINGLETON_KEY) {
            Ok(Some(policy)) => Ok(policy),
            Ok(None) => Err(AclError::PolicyNotFound),
            Err(e @ StoreError::Corrupt { .. }) => {
                tracing::warn!(error = %e, "stored attestation policy is unreadable");
                Err(AclError::MalformedInput(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::attestation::testing;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "uvm_endorsements": { "did": "D1", "feed": "F1", "svn": "5" },
            "measurement": [testing::m1()],
            "policy": [testing::p1()]
        })
    }

    fn attested(svn: &str) -> ProcessorMetadata {
        ProcessorMetadata {
            uvm_endorsements: testing::uvm(svn),
            measurement: testing::m1(),
            policy: testing::p1(),
        }
    }

    #[test]
    fn parses_valid_body() {
        let policy = AttestationPolicy::from_json(&body()).unwrap();
        assert_eq!(policy.uvm_endorsements, testing::uvm("5"));
        assert_eq!(policy.measurement, vec![testing::m1()]);
    }

    #[test]
    fn reports_first_invalid_field() {
        let cases = [
            ("/uvm_endorsements", json!(null), "uvm_endorsements"),
            ("/uvm_endorsements/did", json!(""), "uvm did"),
            ("/uvm_endorsements/feed", json!(7), "uvm feed"),
            ("/uvm_endorsements/svn", json!(5), "uvm svn"),
            ("/measurement", json!("M1"), "measurement"),
            ("/policy", json!(["ok", 3]), "policy"),
        ];
        for (pointer, replacement, needle) in cases {
            let mut b = body();
            *b.pointer_mut(pointer).unwrap() = replacement;
            let err = AttestationPolicy::from_json(&b).unwrap_err();
            assert!(
                matches!(&err, AclError::MalformedInput(m) if m.contains(needle)),
                "{pointer}: {err}"
            );
        }
    }

    #[test]
    fn missing_fields_rejected() {
        for field in ["uvm_endorsements", "measurement", "policy"] {
            let mut b = body();
            b.as_object_mut().unwrap().remove(field);
            assert!(AttestationPolicy::from_json(&b).is_err(), "{field}");
        }
    }

    #[test]
    fn non_numeric_svn_rejected() {
        let mut b = body();
        b["uvm_endorsements"]["svn"] = json!("v5");
        assert!(AttestationPolicy::from_json(&b).is_err());
        b["uvm_endorsements"]["svn"] = json!("-1");
        assert!(AttestationPolicy::from_json(&b).is_err());
    }

    #[test]
    fn empty_lists_accepted_and_admit_nothing() {
        let mut b = body();
        b["measurement"] = json!([]);
        let policy = AttestationPolicy::from_json(&b).unwrap();
        assert!(matches!(
            policy.evaluate(&attested("5")),
            Err(PolicyViolation::MeasurementNotAllowed(_))
        ));
    }

    #[test]
    fn evaluate_accepts_matching_metadata() {
        let policy = AttestationPolicy::from_json(&body()).unwrap();
        assert!(policy.evaluate(&attested("5")).is_ok());
        assert!(policy.evaluate(&attested("6")).is_ok());
    }

    #[test]
    fn svn_is_a_minimum_compared_numerically() {
        let mut policy = AttestationPolicy::from_json(&body()).unwrap();
        assert_eq!(
            policy.evaluate(&attested("4")),
            Err(PolicyViolation::SvnTooOld {
                minimum: 5,
                actual: 4,
            })
        );

        policy.uvm_endorsements.svn = "9".into();
        assert!(policy.evaluate(&attested("10")).is_ok());
    }

    #[test]
    fn unparseable_attested_svn_fails_closed() {
        let policy = AttestationPolicy::from_json(&body()).unwrap();
        assert_eq!(
            policy.evaluate(&attested("latest")),
            Err(PolicyViolation::SvnUnparseable("latest".into()))
        );
    }

    #[test]
    fn checks_run_in_order() {
        let policy = AttestationPolicy::from_json(&body()).unwrap();
        let mut meta = attested("1");
        meta.uvm_endorsements.did = "D2".into();
        meta.measurement = "other".into();
        assert!(matches!(
            policy.evaluate(&meta),
            Err(PolicyViolation::DidMismatch { .. })
        ));

        let mut meta = attested("5");
        meta.uvm_endorsements.feed = "F2".into();
        assert!(matches!(
            policy.evaluate(&meta),
            Err(PolicyViolation::FeedMismatch { .. })
        ));

        let mut meta = attested("5");
        meta.policy = "other".into();
        assert!(matches!(
            policy.evaluate(&meta),
            Err(PolicyViolation::HostDataNotAllowed(_))
        ));
    }

    #[test]
    fn store_round_trip_and_not_found() {
        let policies = AttestationPolicyStore::new("p");
        let mut store = MemoryStore::new();
        assert_eq!(policies.get_policy(&store), Err(AclError::PolicyNotFound));

        let policy = AttestationPolicy::from_json(&body()).unwrap();
        policies.set_policy(&mut store, &policy).unwrap();
        assert_eq!(policies.get_policy(&store).unwrap(), policy);
    }

    #[test]
    fn invalid_policy_leaves_previous_in_place() {
        let policies = AttestationPolicyStore::new("p");
        let mut store = MemoryStore::new();
        let good = AttestationPolicy::from_json(&body()).unwrap();
        policies.set_policy(&mut store, &good).unwrap();

        let mut bad = good.clone();
        bad.uvm_endorsements.svn = String::new();
        assert!(policies.set_policy(&mut store, &bad).is_err());
        assert_eq!(policies.get_policy(&store).unwrap(), good);
    }

    #[test]
    fn corrupt_stored_policy_is_malformed() {
        let policies = AttestationPolicyStore::new("p");
        let mut store = MemoryStore::new();
        store.set("p", SINGLETON_KEY, b"[]".to_vec()).unwrap();
        assert!(matches!(
            policies.get_policy(&store),
            Err(AclError::MalformedInput(_))
        ));
    }
}
