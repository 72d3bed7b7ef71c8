//! Privileged access vault.
//!
//! Stores privileged credentials sealed with AES-256-GCM and releases them
//! only through time-boxed, approved access tickets. Every grant, refusal,
//! reveal and rotation is reported to an audit sink.
//!
//! # Modules
//!
//! - [`crypto`]: AES-256-GCM sealing with a per-secret PBKDF2-derived key.
//! - [`store`]: SQLite-backed secret records ([`Vault`]).
//! - [`policy`]: role policies and the `(user, role)` decision function.
//! - [`workflow`]: access tickets and the reveal gate.
//! - [`broker`]: the caller-facing composition of the above.
//! - [`audit`]: audit events and sinks.
//! - [`rotation`]: password generation and simulated rotation agents.
//! - [`clock`]: injectable time source.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pam_vault::audit::JsonlAuditLog;
//! use pam_vault::broker::{AccessBroker, AccessOutcome};
//! use pam_vault::policy::PolicyEngine;
//! use pam_vault::store::Vault;
//! use pam_vault::workflow::{AccessWorkflow, Verdict};
//!
//! # fn example() -> pam_vault::error::Result<()> {
//! let broker = AccessBroker::new(
//!     Arc::new(Vault::open("pam_vault.db", "master-passphrase")?),
//!     Arc::new(PolicyEngine::load_or_init("policies.toml")?),
//!     AccessWorkflow::default(),
//!     Arc::new(JsonlAuditLog::new("audit.log")),
//! );
//!
//! if let AccessOutcome::Pending { ticket } =
//!     broker.request_access("alice", "linux-prod-01", "kernel patching")?
//! {
//!     broker.decide_request("admin", &ticket.id, Verdict::Approve)?;
//!     let secret = broker.reveal("alice", &ticket.id)?;
//!     println!("valid until {:?}", secret.expires_at);
//! }
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod broker;
pub mod clock;
pub mod crypto;
mod db;
pub mod error;
pub mod policy;
pub mod rotation;
pub mod store;
pub mod workflow;

// Re-export the most commonly used types at the crate root for convenience.
pub use audit::{AuditAction, AuditEvent, AuditSink, JsonlAuditLog, MemoryAuditLog};
pub use broker::{AccessBroker, AccessOutcome, NewSecret, RevealedSecret};
pub use error::{Result, VaultError};
pub use policy::{Decision, DenyReason, PolicyEngine};
pub use rotation::Rotator;
pub use store::{SecretMetadata, SecretType, Vault};
pub use workflow::{AccessTicket, AccessWorkflow, SqliteTicketStore, TicketStatus, Verdict};
