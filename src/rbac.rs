//! Role-based authorization.
//!
//! Roles and assignments are a many-to-many relation held in two tables:
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | role definitions | role name | JSON array of actions |
//! | role assignments | identity | JSON array of role names |
//!
//! An identity may perform an action iff at least one of its assigned roles
//! lists that action. Checks fail closed: an identity with no roles is
//! denied without reading any role definition, and a role whose definition
//! is missing or unreadable grants nothing while the remaining roles are
//! still evaluated.

use std::collections::BTreeSet;

use crate::error::{AclError, AclResult};
use crate::identity::Identity;
use crate::store::{read_json, write_json, KvStore, StoreError};

/// Answers permission queries against role tables in a [`KvStore`].
#[derive(Debug, Clone)]
pub struct RoleAuthorizationEngine {
    definitions: String,
    assignments: String,
}

impl RoleAuthorizationEngine {
    pub fn new(definitions: impl Into<String>, assignments: impl Into<String>) -> Self {
        Self {
            definitions: definitions.into(),
            assignments: assignments.into(),
        }
    }

    /// Whether any role assigned to `identity` permits `action`.
    ///
    /// Never fails: unreadable assignments deny, unreadable role definitions
    /// are skipped. Each skip is logged at `warn`.
    pub fn is_action_allowed<S>(&self, store: &S, identity: &Identity, action: &str) -> bool
    where
        S: KvStore + ?Sized,
    {
        let key = identity.as_str();
        let roles = match read_json::<BTreeSet<String>, _>(store, &self.assignments, key) {
            Ok(Some(roles)) => roles,
            Ok(None) => {
                tracing::debug!(%identity, action, "identity has no role assignment");
                return false;
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "unreadable role assignment; denying");
                return false;
            }
        };
        if roles.is_empty() {
            tracing::debug!(%identity, action, "identity has an empty role set");
            return false;
        }

        for role in &roles {
            match read_json::<BTreeSet<String>, _>(store, &self.definitions, role) {
                Ok(Some(actions)) => {
                    if actions.contains(action) {
                        tracing::debug!(%identity, role, action, "action allowed");
                        return true;
                    }
                }
                Ok(None) => {
                    tracing::warn!(%identity, role, "role is not defined; skipping");
                }
                Err(e) => {
                    tracing::warn!(
                        %identity,
                        role,
                        error = %e,
                        "unreadable role definition; skipping"
                    );
                }
            }
        }

        tracing::debug!(%identity, action, "no assigned role permits action");
        false
    }

    /// Like [`Self::is_action_allowed`], returning `AuthorizationDenied`.
    pub fn authorize<S>(&self, store: &S, identity: &Identity, action: &str) -> AclResult<()>
    where
        S: KvStore + ?Sized,
    {
        if self.is_action_allowed(store, identity, action) {
            Ok(())
        } else {
            Err(AclError::AuthorizationDenied {
                identity: identity.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Creates or replaces a role's action set.
    pub fn define_role<S, A>(&self, store: &mut S, role: &str, actions: A) -> AclResult<()>
    where
        S: KvStore + ?Sized,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        require_non_empty("role", role)?;
        let actions: BTreeSet<String> = actions.into_iter().map(Into::into).collect();
        if actions.iter().any(String::is_empty) {
            return Err(AclError::MalformedInput("action must not be empty".into()));
        }
        write_json(store, &self.definitions, role, &actions)?;
        tracing::info!(role, actions = actions.len(), "role defined");
        Ok(())
    }

    /// Deletes a role definition. Assignments naming it are left in place
    /// and simply grant nothing.
    pub fn remove_role<S>(&self, store: &mut S, role: &str) -> AclResult<bool>
    where
        S: KvStore + ?Sized,
    {
        let removed = store.remove(&self.definitions, role)?;
        if removed {
            tracing::info!(role, "role removed");
        }
        Ok(removed)
    }

    /// Adds `role` to the identity's role set.
    pub fn assign_role<S>(&self, store: &mut S, identity: &Identity, role: &str) -> AclResult<()>
    where
        S: KvStore + ?Sized,
    {
        require_non_empty("role", role)?;
        let mut roles = self.stored_roles(store, identity)?;
        if roles.insert(role.to_string()) {
            write_json(store, &self.assignments, identity.as_str(), &roles)?;
            tracing::info!(%identity, role, "role assigned");
        }
        Ok(())
    }

    /// Removes `role` from the identity's role set. Returns whether it was held.
    pub fn unassign_role<S>(
        &self,
        store: &mut S,
        identity: &Identity,
        role: &str,
    ) -> AclResult<bool>
    where
        S: KvStore + ?Sized,
    {
        let mut roles = self.stored_roles(store, identity)?;
        if !roles.remove(role) {
            return Ok(false);
        }
        write_json(store, &self.assignments, identity.as_str(), &roles)?;
        tracing::info!(%identity, role, "role unassigned");
        Ok(true)
    }

    /// Roles currently assigned to `identity`.
    pub fn roles_of<S>(&self, store: &S, identity: &Identity) -> AclResult<BTreeSet<String>>
    where
        S: KvStore + ?Sized,
    {
        self.stored_roles(store, identity)
    }

    /// Actions a role permits, or `None` if it is not defined.
    pub fn role_actions<S>(&self, store: &S, role: &str) -> AclResult<Option<BTreeSet<String>>>
    where
        S: KvStore + ?Sized,
    {
        Ok(read_json(store, &self.definitions, role)?)
    }

    /// Whether the identity has an assignment record at all.
    pub fn is_known_user<S>(&self, store: &S, identity: &Identity) -> bool
    where
        S: KvStore + ?Sized,
    {
        store
            .has(&self.assignments, identity.as_str())
            .unwrap_or(false)
    }

    fn stored_roles<S>(&self, store: &S, identity: &Identity) -> AclResult<BTreeSet<String>>
    where
        S: KvStore + ?Sized,
    {
        match read_json(store, &self.assignments, identity.as_str()) {
            Ok(roles) => Ok(roles.unwrap_or_default()),
            Err(e @ StoreError::Corrupt { .. }) => {
                let msg = format!("stored roles for {identity} are unreadable: {e}");
                Err(AclError::MalformedInput(msg))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn require_non_empty(what: &str, value: &str) -> AclResult<()> {
    if value.is_empty() {
        let msg = format!("{what} must not be empty");
        return Err(AclError::MalformedInput(msg));
    }
    Ok(())
}
