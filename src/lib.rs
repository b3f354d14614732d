//! # ledger-acl -- access control for a confidential ledger
//!
//! Two cooperating gates in front of a transactional key-value ledger:
//!
//! - **Role-based authorization**: identities hold roles, roles grant
//!   actions. A request proceeds only if some role of the caller grants the
//!   requested action.
//! - **Processor trust**: a processor may register itself by presenting
//!   hardware attestation evidence bound to its own identity. It is trusted
//!   only while its stored attested metadata satisfies the current
//!   administrator allow-list, which is re-read on every check.
//!
//! ## Security Properties
//!
//! - **`#![forbid(unsafe_code)]`**: no `unsafe` anywhere.
//! - **Fail closed**: missing roles, missing or unreadable records, and
//!   storage errors all deny.
//! - **Report binding**: registration requires the leading 32 bytes of the
//!   attested report data to equal SHA-256 of the caller identity.
//! - **No cached trust**: narrowing the allow-list revokes immediately.
//! - **Delegated evidence verification**: hardware evidence is checked by
//!   the platform through [`attestation::AttestationPlatform`]. This crate
//!   only hashes with `sha2`.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`identity`] | Caller identities from certificates or tokens |
//! | [`rbac`] | Role definitions, assignments, permission checks |
//! | [`attestation`] | Evidence verification seam, report binding, allow-list |
//! | [`registry`] | Per-processor attested metadata and trust checks |
//! | [`user_policy`] | Opaque per-user policy documents |
//! | [`gateway`] | Endpoint-facing facade with authorization gates |
//! | [`store`] | Key-value store trait and in-memory transactional store |
//! | [`config`] | Table names, guarded actions, authentication scheme |
//! | [`fs_guard`] | Symlink-safe, size-bounded file I/O |
//! | [`error`] | Error taxonomy with stable codes |

#![forbid(unsafe_code)]

pub mod error;

/// Symlink-safe, size-bounded file reads and atomic replacement writes.
pub mod fs_guard;

/// Transactional, versioned key-value storage.
pub mod store;

/// Deployment configuration with secure defaults.
pub mod config;

pub mod identity;

/// Role-based authorization over two ledger tables.
pub mod rbac;

pub mod attestation;

/// Attestation-gated processor registration and trust checks.
pub mod registry;

pub mod user_policy;

pub mod gateway;

pub use config::AclConfig;
pub use error::{AclError, AclResult, PolicyViolation};
pub use gateway::Gateway;
pub use identity::Identity;
pub use store::{KvStore, MemoryStore};
