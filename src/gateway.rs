//! Endpoint-facing facade.
//!
//! [`Gateway`] wires the components together from an [`AclConfig`] and
//! applies the authorization gates request handlers need:
//!
//! | Operation | Gate |
//! |-----------|------|
//! | `set_attestation_policy` | caller holds the attestation-policy write action |
//! | `set_user_policy` | caller holds the user-policy write action |
//! | `register_processor` | none; the evidence must bind to the caller |
//! | `authorize_processor` | caller holds the action, then is a trusted processor |
//!
//! Role administration (`define_role`, `assign_role`) is ungated here; the
//! ledger restricts who can write the role tables.
//!
//! Every method takes the store explicitly so one request runs inside one
//! transaction.

use std::sync::Arc;

use serde_json::Value;

use crate::attestation::{
    AttestationPlatform, AttestationPolicy, AttestationPolicyStore, AttestationVerifier,
    RegistrationRequest,
};
use crate::config::{AclConfig, ActionNames};
use crate::error::{AclError, AclResult};
use crate::identity::{CallerCredentials, Identity, IdentityResolver};
use crate::rbac::RoleAuthorizationEngine;
use crate::registry::{ProcessorRecord, ProcessorTrustRegistry};
use crate::store::KvStore;
use crate::user_policy::UserPolicyRegistry;

#[derive(Debug, Clone)]
pub struct Gateway {
    resolver: IdentityResolver,
    rbac: RoleAuthorizationEngine,
    registry: ProcessorTrustRegistry,
    verifier: AttestationVerifier,
    users: UserPolicyRegistry,
    actions: ActionNames,
}

impl Gateway {
    pub fn new(config: &AclConfig, platform: Arc<dyn AttestationPlatform>) -> Self {
        let tables = &config.tables;
        tracing::debug!(
            platform = platform.platform_id(),
            scheme = ?config.auth_scheme,
            "gateway configured"
        );
        Self {
            resolver: IdentityResolver::new(config.auth_scheme, config.token.clone()),
            rbac: RoleAuthorizationEngine::new(&tables.role_definitions, &tables.role_assignments),
            registry: ProcessorTrustRegistry::new(
                &tables.processors,
                AttestationPolicyStore::new(&tables.attestation_policy),
            ),
            verifier: AttestationVerifier::new(platform),
            users: UserPolicyRegistry::new(&tables.user_policies),
            actions: config.actions.clone(),
        }
    }

    pub fn rbac(&self) -> &RoleAuthorizationEngine {
        &self.rbac
    }

    pub fn registry(&self) -> &ProcessorTrustRegistry {
        &self.registry
    }

    pub fn users(&self) -> &UserPolicyRegistry {
        &self.users
    }

    pub fn resolve_caller(&self, creds: &CallerCredentials) -> AclResult<Identity> {
        self.resolver.resolve(creds)
    }

    pub fn authorize<S>(&self, store: &S, caller: &Identity, action: &str) -> AclResult<()>
    where
        S: KvStore + ?Sized,
    {
        self.rbac.authorize(store, caller, action)
    }

    pub fn define_role<S, A>(&self, store: &mut S, role: &str, actions: A) -> AclResult<()>
    where
        S: KvStore + ?Sized,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        self.rbac.define_role(store, role, actions)
    }

    pub fn assign_role<S>(&self, store: &mut S, identity: &Identity, role: &str) -> AclResult<()>
    where
        S: KvStore + ?Sized,
    {
        self.rbac.assign_role(store, identity, role)
    }

    /// Replaces the processor allow-list. Permission is checked before the
    /// body is validated.
    pub fn set_attestation_policy<S>(
        &self,
        store: &mut S,
        caller: &Identity,
        body: &Value,
    ) -> AclResult<AttestationPolicy>
    where
        S: KvStore + ?Sized,
    {
        self.rbac
            .authorize(&*store, caller, &self.actions.attestation_policy_write)?;
        let policy = AttestationPolicy::from_json(body)?;
        self.registry.policies().set_policy(store, &policy)?;
        Ok(policy)
    }

    pub fn attestation_policy<S>(&self, store: &S) -> AclResult<AttestationPolicy>
    where
        S: KvStore + ?Sized,
    {
        self.registry.policies().get_policy(store)
    }

    /// Registers the caller as a processor from a JSON registration body.
    pub fn register_processor<S>(
        &self,
        store: &mut S,
        caller: &Identity,
        body: &Value,
    ) -> AclResult<ProcessorRecord>
    where
        S: KvStore + ?Sized,
    {
        let evidence = RegistrationRequest::from_json(body)?.decode()?;
        self.registry
            .register(store, &self.verifier, caller, &evidence)
    }

    pub fn is_valid_processor<S>(&self, store: &S, identity: &Identity) -> bool
    where
        S: KvStore + ?Sized,
    {
        self.registry.is_valid(store, identity)
    }

    /// Fails unless `caller` is a currently trusted processor.
    pub fn require_trusted_processor<S>(
        &self,
        store: &S,
        caller: &Identity,
    ) -> AclResult<ProcessorRecord>
    where
        S: KvStore + ?Sized,
    {
        self.registry.check(store, caller).inspect_err(|e| {
            tracing::warn!(processor = %caller, reason = %e, "untrusted processor refused");
        })
    }

    /// RBAC gate, then processor trust.
    pub fn authorize_processor<S>(
        &self,
        store: &S,
        caller: &Identity,
        action: &str,
    ) -> AclResult<ProcessorRecord>
    where
        S: KvStore + ?Sized,
    {
        self.rbac.authorize(store, caller, action)?;
        self.require_trusted_processor(store, caller)
    }

    /// Stores a user's policy from `{"cert": <identity>, "policy": <string>}`.
    ///
    /// A `cert` that parses as a hex fingerprint is stored under its
    /// canonical `XX:XX:...` form, the same key the resolver derives for
    /// that user's requests.
    pub fn set_user_policy<S>(
        &self,
        store: &mut S,
        caller: &Identity,
        body: &Value,
    ) -> AclResult<()>
    where
        S: KvStore + ?Sized,
    {
        self.rbac
            .authorize(&*store, caller, &self.actions.user_policy_write)?;
        let user = non_empty_str(body, "cert", "user certificate")?;
        let policy = non_empty_str(body, "policy", "policy")?;
        let user = Identity::from_fingerprint_hex(user).or_else(|_| Identity::new(user))?;
        self.users.set(store, &user, policy)
    }

    /// The caller's own policy.
    pub fn user_policy<S>(&self, store: &S, caller: &Identity) -> AclResult<String>
    where
        S: KvStore + ?Sized,
    {
        self.users.get(store, caller)
    }
}

fn non_empty_str<'a>(body: &'a Value, field: &str, label: &str) -> AclResult<&'a str> {
    match body.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(AclError::MalformedInput(format!("missing or invalid {label}"))),
    }
}
