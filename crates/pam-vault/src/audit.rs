//! Audit events and sinks.
//!
//! The core reports every state-changing operation (and every reveal attempt)
//! to an [`AuditSink`]; it never formats or stores log lines itself. Two sinks
//! ship with the crate:
//!
//! - [`JsonlAuditLog`] appends one JSON object per line to a file.
//! - [`MemoryAuditLog`] keeps events in memory for tests and embedding.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CreateSecret,
    ListSecrets,
    AccessDenied,
    RequestCreated,
    AutoApproved,
    RequestApproved,
    RequestDenied,
    SecretRetrieved,
    RetrievalFailed,
    RotateSecret,
    RotateFailure,
    AuditAccess,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::CreateSecret => "CREATE_SECRET",
            Self::ListSecrets => "LIST_SECRETS",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::RequestCreated => "REQUEST_CREATED",
            Self::AutoApproved => "AUTO_APPROVED",
            Self::RequestApproved => "REQUEST_APPROVED",
            Self::RequestDenied => "REQUEST_DENIED",
            Self::SecretRetrieved => "SECRET_RETRIEVED",
            Self::RetrievalFailed => "RETRIEVAL_FAILED",
            Self::RotateSecret => "ROTATE_SECRET",
            Self::RotateFailure => "ROTATE_FAILURE",
            Self::AuditAccess => "AUDIT_ACCESS",
        };
        f.write_str(label)
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub user: String,
    pub secret_id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl AuditEvent {
    /// A successful event with no secret and no details.
    pub fn new(timestamp: DateTime<Utc>, action: AuditAction, user: impl Into<String>) -> Self {
        Self {
            timestamp,
            action,
            user: user.into(),
            secret_id: None,
            success: true,
            details: serde_json::Map::new(),
        }
    }

    pub fn secret(mut self, secret_id: impl Into<String>) -> Self {
        self.secret_id = Some(secret_id.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Receiver of audit events.
///
/// Implementations must be safe to share across threads and must not
/// silently drop events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<()>;

    /// The most recent `limit` events, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>>;
}

// ---------------------------------------------------------------------------
// JSON-lines file sink
// ---------------------------------------------------------------------------

/// Append-only JSON-lines audit file.
///
/// The file is opened lazily on the first write and the handle is reused.
pub struct JsonlAuditLog {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl JsonlAuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for JsonlAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlAuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut guard = self.writer.lock().map_err(|e| VaultError::Audit {
            reason: format!("audit writer mutex poisoned: {e}"),
        })?;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| VaultError::Audit {
                    reason: format!("failed to open audit file '{}': {e}", self.path.display()),
                })?;
            *guard = Some(file);
        }
        let file = guard.as_mut().ok_or_else(|| VaultError::Audit {
            reason: "audit file handle unexpectedly missing".into(),
        })?;

        file.write_all(&line)
            .and_then(|()| file.flush())
            .map_err(|e| VaultError::Audit {
                reason: format!("write failed: {e}"),
            })?;

        tracing::info!(
            action = %event.action,
            user = %event.user,
            secret_id = event.secret_id.as_deref().unwrap_or("-"),
            success = event.success,
            "audit"
        );
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(error = %e, "skipping malformed audit line"),
            }
        }

        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|e| VaultError::Audit {
                reason: format!("audit buffer mutex poisoned: {e}"),
            })?
            .push(event.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let events = self.events();
        let skip = events.len().saturating_sub(limit);
        Ok(events[skip..].to_vec())
    }
}
