//! Credential rotation.
//!
//! A [`Rotator`] generates a fresh password, asks the agent registered for the
//! secret's type to apply it on the target system, and only then replaces the
//! sealed value in the [`Vault`]. If the target refuses, the vault keeps the
//! last known good value.
//!
//! The bundled agents are simulators: they log the command a real agent would
//! run (with the password masked) and sleep for a configurable latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::clock::{Clock, SystemClock};
use crate::crypto::fill_random;
use crate::error::{Result, VaultError};
use crate::policy::PolicyEngine;
use crate::store::{SecretType, Vault};

/// Length of generated passwords unless the caller asks otherwise.
pub const DEFAULT_PASSWORD_LEN: usize = 24;

const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_USERNAME: &str = "admin";
const SIMULATED_LATENCY: Duration = Duration::from_millis(500);

/// Generate a password of `len` characters drawn uniformly from letters,
/// digits and `!@#$%^&*()`.
pub fn generate_password(len: usize) -> Result<String> {
    // Largest multiple of the alphabet size that fits in a byte; bytes at or
    // above it are rejected to keep the draw unbiased.
    let limit = (256 / PASSWORD_ALPHABET.len() * PASSWORD_ALPHABET.len()) as u8;

    let mut password = String::with_capacity(len);
    let mut pool = [0u8; 64];
    while password.len() < len {
        fill_random(&mut pool)?;
        for &b in pool.iter().filter(|&&b| b < limit) {
            if password.len() == len {
                break;
            }
            password.push(PASSWORD_ALPHABET[usize::from(b) % PASSWORD_ALPHABET.len()] as char);
        }
    }
    Ok(password)
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Applies a new credential on a target system.
#[async_trait]
pub trait PasswordChanger: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Set `username`'s password on `host` to `new_password`.
    ///
    /// # Errors
    ///
    /// [`VaultError::Target`] if the target refused or was unreachable.
    async fn change_password(&self, host: &str, username: &str, new_password: &str) -> Result<()>;
}

/// Kind of system a [`SimulatedTarget`] pretends to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Linux,
    Windows,
    Database,
}

impl TargetKind {
    fn label(self) -> &'static str {
        match self {
            Self::Linux => "linux-sim",
            Self::Windows => "windows-sim",
            Self::Database => "db-sim",
        }
    }

    /// The command a real agent would run, with the secret masked.
    fn masked_command(self, username: &str) -> String {
        match self {
            Self::Linux => format!("echo '{username}:******' | chpasswd"),
            Self::Windows => format!("net user {username} *******"),
            Self::Database => format!("ALTER USER {username} WITH PASSWORD '****';"),
        }
    }
}

/// Stand-in rotation agent that never touches a real host.
#[derive(Debug, Clone)]
pub struct SimulatedTarget {
    kind: TargetKind,
    latency: Duration,
    fail: bool,
}

impl SimulatedTarget {
    pub fn new(kind: TargetKind) -> Self {
        Self {
            kind,
            latency: SIMULATED_LATENCY,
            fail: false,
        }
    }

    pub fn linux() -> Self {
        Self::new(TargetKind::Linux)
    }

    pub fn windows() -> Self {
        Self::new(TargetKind::Windows)
    }

    pub fn database() -> Self {
        Self::new(TargetKind::Database)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every change attempt fail.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl PasswordChanger for SimulatedTarget {
    fn name(&self) -> &str {
        self.kind.label()
    }

    async fn change_password(&self, host: &str, username: &str, _new_password: &str) -> Result<()> {
        tracing::info!(agent = self.name(), host = host, "connecting");
        tokio::time::sleep(self.latency).await;

        if self.fail {
            tracing::warn!(agent = self.name(), host = host, "target refused the change");
            return Err(VaultError::Target {
                host: host.to_string(),
                reason: "simulated failure".into(),
            });
        }

        tracing::info!(
            agent = self.name(),
            command = %self.kind.masked_command(username),
            "executing"
        );
        tracing::info!(agent = self.name(), host = host, username = username, "password changed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rotator
// ---------------------------------------------------------------------------

/// What a successful rotation touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotationReport {
    pub secret_id: String,
    pub host: String,
    pub username: String,
    pub rotated_at: DateTime<Utc>,
}

/// Outcome of one secret in a [`Rotator::rotate_due`] sweep.
#[derive(Debug)]
pub struct DueRotation {
    pub secret_id: String,
    pub outcome: Result<RotationReport>,
}

pub struct Rotator {
    vault: Arc<Vault>,
    audit: Arc<dyn AuditSink>,
    agents: HashMap<SecretType, Arc<dyn PasswordChanger>>,
    clock: Arc<dyn Clock>,
}

impl Rotator {
    /// A rotator with no agents registered.
    pub fn new(vault: Arc<Vault>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            vault,
            audit,
            agents: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// A rotator with simulated linux, windows and database agents.
    pub fn with_simulators(vault: Arc<Vault>, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(vault, audit)
            .register(SecretType::Linux, Arc::new(SimulatedTarget::linux()))
            .register(SecretType::Windows, Arc::new(SimulatedTarget::windows()))
            .register(SecretType::Database, Arc::new(SimulatedTarget::database()))
    }

    /// Route secrets of `secret_type` to `agent`, replacing any previous one.
    pub fn register(mut self, secret_type: SecretType, agent: Arc<dyn PasswordChanger>) -> Self {
        self.agents.insert(secret_type, agent);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run a vault call on the blocking pool; every vault method touches
    /// SQLite and some derive keys.
    async fn with_vault<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Vault) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let vault = Arc::clone(&self.vault);
        tokio::task::spawn_blocking(move || f(&vault))
            .await
            .map_err(|e| VaultError::Internal(format!("vault task panicked: {e}")))?
    }

    /// Rotate one secret.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if the secret does not exist.
    /// - [`VaultError::UnsupportedSecretType`] if no agent handles its type.
    /// - [`VaultError::RotationFailed`] if the target refused; the stored
    ///   value is unchanged.
    #[tracing::instrument(skip(self), fields(secret_type = tracing::field::Empty))]
    pub async fn rotate(&self, secret_id: &str, triggered_by: &str) -> Result<RotationReport> {
        let id = secret_id.to_string();
        let record = self.with_vault(move |v| v.metadata_of(&id)).await?;
        tracing::Span::current().record("secret_type", record.secret_type.as_str());

        let host = record
            .metadata
            .attribute_str("host")
            .unwrap_or(DEFAULT_HOST)
            .to_string();
        let username = record
            .metadata
            .attribute_str("username")
            .unwrap_or(DEFAULT_USERNAME)
            .to_string();

        let Some(agent) = self.agents.get(&record.secret_type) else {
            let err = VaultError::UnsupportedSecretType {
                secret_type: record.secret_type.to_string(),
            };
            self.record_failure(secret_id, triggered_by, &err)?;
            return Err(err);
        };

        tracing::info!(agent = agent.name(), host = %host, "starting rotation");
        let new_password = zeroize::Zeroizing::new(generate_password(DEFAULT_PASSWORD_LEN)?);

        if let Err(e) = agent.change_password(&host, &username, &new_password).await {
            let err = VaultError::RotationFailed {
                secret_id: secret_id.to_string(),
                reason: e.to_string(),
            };
            tracing::error!(error = %e, "rotation failed, stored value kept");
            self.record_failure(secret_id, triggered_by, &err)?;
            return Err(err);
        }

        let id = secret_id.to_string();
        let value = new_password.clone();
        if let Err(e) = self.with_vault(move |v| v.update_value(&id, &value)).await {
            // The target already has the new password; only the vault is stale.
            tracing::error!(error = %e, "target changed but vault update failed");
            self.record_failure(secret_id, triggered_by, &e)?;
            return Err(e);
        }

        let report = RotationReport {
            secret_id: secret_id.to_string(),
            host,
            username,
            rotated_at: self.clock.now(),
        };
        self.audit.record(
            &AuditEvent::new(report.rotated_at, AuditAction::RotateSecret, triggered_by)
                .secret(secret_id)
                .detail("host", report.host.as_str())
                .detail("status", "rotated"),
        )?;
        tracing::info!(host = %report.host, "rotation complete");
        Ok(report)
    }

    /// Rotate every secret whose role has a `rotation_hours` interval that
    /// has elapsed since its last rotation.
    ///
    /// An interval too large to add to `last_rotated` never comes due.
    pub async fn rotate_due(&self, policies: &PolicyEngine, triggered_by: &str) -> Result<Vec<DueRotation>> {
        let records = self
            .with_vault(|v| {
                v.list_all()?
                    .into_iter()
                    .map(|summary| v.metadata_of(&summary.id))
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        let now = self.clock.now();
        let mut due = Vec::new();
        for record in records {
            let Some(hours) = policies
                .policy(&record.metadata.role)
                .and_then(|p| p.rotation_hours)
            else {
                continue;
            };
            let next = record
                .last_rotated
                .checked_add_signed(chrono::Duration::hours(i64::from(hours)));
            if next.is_some_and(|next| next <= now) {
                due.push(record.id);
            }
        }

        tracing::info!(count = due.len(), "secrets due for rotation");
        let mut results = Vec::with_capacity(due.len());
        for secret_id in due {
            let outcome = self.rotate(&secret_id, triggered_by).await;
            results.push(DueRotation { secret_id, outcome });
        }
        Ok(results)
    }

    fn record_failure(&self, secret_id: &str, triggered_by: &str, err: &VaultError) -> Result<()> {
        self.audit.record(
            &AuditEvent::new(self.clock.now(), AuditAction::RotateFailure, triggered_by)
                .secret(secret_id)
                .failed()
                .detail("error", err.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::clock::ManualClock;
    use crate::store::SecretMetadata;

    fn instant(kind: TargetKind) -> Arc<SimulatedTarget> {
        Arc::new(SimulatedTarget::new(kind).with_latency(Duration::ZERO))
    }

    struct Fixture {
        vault: Arc<Vault>,
        audit: Arc<MemoryAuditLog>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let vault = Vault::open_in_memory("rotation-master")
            .unwrap()
            .with_clock(clock.clone());
        vault
            .put(
                "linux-prod-01",
                "Linux Production Server",
                &SecretType::Linux,
                "InitialPass123!",
                &SecretMetadata::new("linux-admin").with_attribute("host", "192.168.1.10"),
            )
            .unwrap();
        Fixture {
            vault: Arc::new(vault),
            audit: Arc::new(MemoryAuditLog::new()),
            clock,
        }
    }

    fn rotator(f: &Fixture, agent: Arc<SimulatedTarget>) -> Rotator {
        Rotator::new(f.vault.clone(), f.audit.clone())
            .register(SecretType::Linux, agent)
            .with_clock(f.clock.clone())
    }

    #[test]
    fn generated_passwords_use_the_alphabet() {
        let pw = generate_password(DEFAULT_PASSWORD_LEN).unwrap();
        assert_eq!(pw.len(), DEFAULT_PASSWORD_LEN);
        assert!(pw.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));

        assert_eq!(generate_password(0).unwrap(), "");
        assert_eq!(generate_password(200).unwrap().len(), 200);
        assert_ne!(generate_password(32).unwrap(), generate_password(32).unwrap());
    }

    #[tokio::test]
    async fn successful_rotation_replaces_value() {
        let f = fixture();
        f.clock.advance(chrono::Duration::hours(1));

        let report = rotator(&f, instant(TargetKind::Linux))
            .rotate("linux-prod-01", "raouf")
            .await
            .unwrap();
        assert_eq!(report.host, "192.168.1.10");
        assert_eq!(report.username, "admin");

        let value = f.vault.reveal("linux-prod-01").unwrap();
        assert_ne!(value.as_str(), "InitialPass123!");
        assert_eq!(value.len(), DEFAULT_PASSWORD_LEN);
        assert_eq!(f.vault.metadata_of("linux-prod-01").unwrap().last_rotated, f.clock.now());

        let event = f.audit.events().pop().unwrap();
        assert_eq!(event.action, AuditAction::RotateSecret);
        assert_eq!(event.user, "raouf");
        assert!(event.success);
    }

    #[tokio::test]
    async fn failing_target_keeps_old_value() {
        let f = fixture();
        let agent = Arc::new(SimulatedTarget::linux().with_latency(Duration::ZERO).failing());

        let err = rotator(&f, agent)
            .rotate("linux-prod-01", "system")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::RotationFailed { .. }));
        assert_eq!(f.vault.reveal("linux-prod-01").unwrap().as_str(), "InitialPass123!");

        let event = f.audit.events().pop().unwrap();
        assert_eq!(event.action, AuditAction::RotateFailure);
        assert!(!event.success);
    }

    #[tokio::test]
    async fn unregistered_type_is_unsupported() {
        let f = fixture();
        let rotator = Rotator::new(f.vault.clone(), f.audit.clone());

        let err = rotator.rotate("linux-prod-01", "system").await.unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedSecretType { .. }));
        assert_eq!(f.audit.events()[0].action, AuditAction::RotateFailure);
    }

    #[tokio::test]
    async fn missing_secret_is_not_found() {
        let f = fixture();
        let err = rotator(&f, instant(TargetKind::Linux))
            .rotate("ghost", "system")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rotate_due_honours_interval() {
        let f = fixture();
        let policies = PolicyEngine::defaults().unwrap();
        let rotator = rotator(&f, instant(TargetKind::Linux));

        f.clock.advance(chrono::Duration::hours(23));
        assert!(rotator.rotate_due(&policies, "scheduler").await.unwrap().is_empty());

        f.clock.advance(chrono::Duration::hours(1));
        let results = rotator.rotate_due(&policies, "scheduler").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].secret_id, "linux-prod-01");
        assert!(results[0].outcome.is_ok());

        // Freshly rotated, so nothing is due again.
        assert!(rotator.rotate_due(&policies, "scheduler").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn huge_rotation_interval_is_never_due() {
        let f = fixture();
        let policies = PolicyEngine::from_toml_str(
            r#"
[[policies]]
role = "linux-admin"
approval_required = true
ttl_minutes = 15
rotation_hours = 4294967295
allowed_users = ["alice"]
"#,
        )
        .unwrap();
        let rotator = rotator(&f, instant(TargetKind::Linux));

        f.clock.advance(chrono::Duration::days(365 * 50));
        assert!(rotator.rotate_due(&policies, "scheduler").await.unwrap().is_empty());
        assert_eq!(f.vault.reveal("linux-prod-01").unwrap().as_str(), "InitialPass123!");
    }

    #[tokio::test]
    async fn agent_registered_by_parsed_label_handles_secret() {
        let f = fixture();
        let rotator = Rotator::new(f.vault.clone(), f.audit.clone())
            .register(SecretType::parse("linux"), instant(TargetKind::Linux))
            .with_clock(f.clock.clone());

        assert!(rotator.rotate("linux-prod-01", "raouf").await.is_ok());
    }
}
