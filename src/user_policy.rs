//! Per-user policy documents.
//!
//! Each identity may have one opaque policy string. The registry stores and
//! returns it unchanged; interpreting it is up to the caller.

use crate::error::{AclError, AclResult};
use crate::identity::Identity;
use crate::store::{read_json, write_json, KvStore};

#[derive(Debug, Clone)]
pub struct UserPolicyRegistry {
    table: String,
}

impl UserPolicyRegistry {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Stores `policy` for `identity`, replacing any previous value.
    pub fn set<S>(&self, store: &mut S, identity: &Identity, policy: &str) -> AclResult<()>
    where
        S: KvStore + ?Sized,
    {
        if policy.is_empty() {
            return Err(AclError::MalformedInput("user policy is empty".into()));
        }
        write_json(store, &self.table, identity.as_str(), policy)?;
        tracing::info!(user = %identity, "user policy updated");
        Ok(())
    }

    pub fn get<S>(&self, store: &S, identity: &Identity) -> AclResult<String>
    where
        S: KvStore + ?Sized,
    {
        read_json::<String, _>(store, &self.table, identity.as_str())?
            .ok_or_else(|| AclError::UserPolicyNotFound(identity.to_string()))
    }
}
