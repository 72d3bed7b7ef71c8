//! Vault error types.
//!
//! All vault subsystems surface errors through [`VaultError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.
//!
//! Two distinctions matter to callers and are never blurred:
//!
//! - [`VaultError::NotFound`] means the referenced secret or ticket is absent.
//! - [`VaultError::Integrity`] means it exists but could not be authenticated
//!   (tampered record, wrong master key, corruption).

/// Unified error type for the privileged access vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Sealing failed (e.g. the system CSPRNG or `ring` reported a failure).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Unsealing failed authentication, or the stored envelope is malformed.
    /// No plaintext is ever returned alongside this error.
    #[error("integrity check failed: {reason}")]
    Integrity { reason: String },

    // -- Lookup errors ------------------------------------------------------
    /// The referenced secret or ticket does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // -- Access errors ------------------------------------------------------
    /// The reveal gate refused the ticket. Whether it was missing, pending,
    /// denied, expired or owned by someone else is intentionally not exposed.
    #[error("access invalid or expired: ticket={ticket_id}")]
    AccessDenied { ticket_id: String },

    // -- Policy errors ------------------------------------------------------
    /// The policy table is inconsistent (e.g. a role defined twice).
    #[error("conflicting policy: {reason}")]
    ConflictingPolicy { reason: String },

    // -- Rotation errors ----------------------------------------------------
    /// No rotation agent handles this secret type.
    #[error("unsupported secret type for rotation: {secret_type}")]
    UnsupportedSecretType { secret_type: String },

    /// The target system rejected the new credential; the vault still holds
    /// the last known good value.
    #[error("rotation failed for {secret_id}: {reason}")]
    RotationFailed { secret_id: String, reason: String },

    /// A rotation agent could not change the credential on the target host.
    #[error("target {host} rejected the change: {reason}")]
    Target { host: String, reason: String },

    // -- Audit errors -------------------------------------------------------
    /// The audit sink could not record an event.
    #[error("audit sink failure: {reason}")]
    Audit { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Policy document could not be parsed.
    #[error("policy file error: {0}")]
    PolicyFormat(#[from] toml::de::Error),

    /// I/O error from the filesystem (policy file, audit log, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal vault error: {0}")]
    Internal(String),
}

impl VaultError {
    pub(crate) fn secret_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "secret",
            id: id.into(),
        }
    }

    pub(crate) fn ticket_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "ticket",
            id: id.into(),
        }
    }

    /// Short stable label for audit details and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EncryptionFailed { .. } => "encryption_failed",
            Self::Integrity { .. } => "integrity",
            Self::NotFound { .. } => "not_found",
            Self::AccessDenied { .. } => "access_denied",
            Self::ConflictingPolicy { .. } => "conflicting_policy",
            Self::UnsupportedSecretType { .. } => "unsupported_secret_type",
            Self::RotationFailed { .. } => "rotation_failed",
            Self::Target { .. } => "target",
            Self::Audit { .. } => "audit",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::PolicyFormat(_) => "policy_format",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
