use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::identity::{AuthScheme, TokenExpectations};

/// Maximum config file size (1 MB).
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// Names of the ledger tables the core reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub role_definitions: String,
    pub role_assignments: String,
    pub attestation_policy: String,
    pub processors: String,
    pub user_policies: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            role_definitions: "public:confidentialledger.roles.user_roles_definitions".to_string(),
            role_assignments: "public:confidentialledger.roles.user_roles_mapping".to_string(),
            attestation_policy: "public:acl.validProcessorPolicy".to_string(),
            processors: "public:acl.validProcessors".to_string(),
            user_policies: "public:acl.userPolicy".to_string(),
        }
    }
}

/// Guarded action names for administrative writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionNames {
    pub attestation_policy_write: String,
    pub user_policy_write: String,
}

impl Default for ActionNames {
    fn default() -> Self {
        Self {
            attestation_policy_write: "/policy/write".to_string(),
            user_policy_write: "/policy/write".to_string(),
        }
    }
}

/// Deployment configuration. Every field has a default, so an empty JSON
/// object is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    pub tables: TableNames,
    pub actions: ActionNames,
    pub auth_scheme: AuthScheme,
    /// Claims a bearer token must carry. `None` skips the claim check.
    pub token: Option<TokenExpectations>,
}

impl AclConfig {
    /// Loads a JSON config. `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(p) = path else {
            return Ok(Self::default());
        };
        let bytes = crate::fs_guard::read_bounded(p, MAX_CONFIG_BYTES)
            .with_context(|| format!("reading config {}", p.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing config {}", p.display()))
    }
}
