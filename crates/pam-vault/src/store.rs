//! SQLite-backed store of sealed secrets.
//!
//! The [`Vault`] owns the master key (through its [`CryptoEngine`]) and is the
//! only component that seals or unseals secret values. Values are sealed
//! before they reach SQLite and unsealed only by [`Vault::reveal`].
//!
//! # Schema
//!
//! One table, `secrets`, one row per secret:
//!
//! | column         | content                                         |
//! |----------------|-------------------------------------------------|
//! | `id`           | primary key                                     |
//! | `name`, `type` | plaintext labels                                |
//! | `ciphertext`, `iv`, `salt`, `tag` | envelope, each base64 encoded |
//! | `metadata`     | flat JSON object, always carrying `role`        |
//! | `created_at`, `last_rotated` | RFC 3339 timestamps               |
//!
//! Every mutation is a single `INSERT OR REPLACE` or `UPDATE`, so a reader
//! never observes an envelope whose components come from different seals.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::crypto::{CryptoEngine, EncodedEnvelope};
use crate::db::ConnectionSource;
use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Category of the system a credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SecretType {
    Linux,
    Windows,
    Database,
    /// Any other category tag, kept verbatim. Only [`SecretType::parse`]
    /// builds one, so a known label never ends up here.
    Other(CustomType),
}

/// Label of a [`SecretType::Other`] category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomType(String);

impl CustomType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SecretType {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Database => "database",
            Self::Other(tag) => tag.as_str(),
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Self {
        match s {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            "database" => Self::Database,
            other => Self::Other(CustomType(other.to_string())),
        }
    }
}

impl From<String> for SecretType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<SecretType> for String {
    fn from(t: SecretType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for SecretType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Public metadata of a secret.
///
/// `role` selects the access policy. `attributes` holds anything else
/// (`host`, `username`, ...) and never influences policy. Both are persisted
/// together as one flat JSON object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SecretMetadata {
    pub role: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl SecretMetadata {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute. The reserved key `role` is ignored.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let key = key.into();
        if key != "role" {
            self.attributes.insert(key, value.into());
        }
        self
    }

    /// String attribute lookup.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

impl Serialize for SecretMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let extra = self.attributes.iter().filter(|(k, _)| k.as_str() != "role");
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("role", &self.role)?;
        for (key, value) in extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Everything known about a secret except its sealed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecretRecord {
    pub id: String,
    pub name: String,
    pub secret_type: SecretType,
    pub metadata: SecretMetadata,
    pub created_at: DateTime<Utc>,
    pub last_rotated: DateTime<Utc>,
}

/// Listing entry returned by [`Vault::list_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecretSummary {
    pub id: String,
    pub name: String,
    pub secret_type: SecretType,
    pub last_rotated: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Encrypted secret store backed by SQLite.
///
/// # Example
///
/// ```rust,no_run
/// # use pam_vault::store::{Vault, SecretMetadata, SecretType};
/// # fn example() -> pam_vault::error::Result<()> {
/// let vault = Vault::open("pam_vault.db", "master-passphrase")?;
///
/// vault.put(
///     "linux-prod-01",
///     "Linux Production Server",
///     &SecretType::Linux,
///     "InitialPass123!",
///     &SecretMetadata::new("linux-admin").with_attribute("host", "192.168.1.10"),
/// )?;
///
/// let value = vault.reveal("linux-prod-01")?;
/// assert_eq!(value.as_str(), "InitialPass123!");
/// # Ok(())
/// # }
/// ```
pub struct Vault {
    db: ConnectionSource,
    crypto: CryptoEngine,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("db", &self.db.describe())
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Open (or create) a vault database at `path` sealed under `master_key`.
    ///
    /// Runs schema migrations automatically.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the database cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: impl AsRef<Path>, master_key: impl AsRef<[u8]>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault database");

        let vault = Self {
            db: ConnectionSource::file(path),
            crypto: CryptoEngine::new(master_key),
            clock: Arc::new(SystemClock),
        };
        vault.run_migrations()?;

        tracing::info!("vault database ready");
        Ok(vault)
    }

    /// Open an in-memory vault (useful for testing).
    pub fn open_in_memory(master_key: impl AsRef<[u8]>) -> Result<Self> {
        let vault = Self {
            db: ConnectionSource::memory()?,
            crypto: CryptoEngine::new(master_key),
            clock: Arc::new(SystemClock),
        };
        vault.run_migrations()?;
        Ok(vault)
    }

    /// Replace the time source used for `created_at` / `last_rotated`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn run_migrations(&self) -> Result<()> {
        tracing::debug!("running vault schema migrations");
        self.db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS secrets (
                    id           TEXT PRIMARY KEY,
                    name         TEXT NOT NULL,
                    type         TEXT NOT NULL,
                    ciphertext   TEXT NOT NULL,
                    iv           TEXT NOT NULL,
                    salt         TEXT NOT NULL,
                    tag          TEXT NOT NULL,
                    metadata     TEXT,
                    created_at   TEXT,
                    last_rotated TEXT
                );",
            )?;
            Ok(())
        })
    }

    // -- Secret operations --------------------------------------------------

    /// Seal `plaintext` and insert or replace the secret `id`.
    ///
    /// Re-putting an existing id replaces the whole row, including
    /// `created_at`.
    pub fn put(
        &self,
        id: &str,
        name: &str,
        secret_type: &SecretType,
        plaintext: &str,
        metadata: &SecretMetadata,
    ) -> Result<()> {
        let sealed = self.crypto.seal(plaintext.as_bytes())?.encode();
        let metadata_json = serde_json::to_string(metadata)?;
        let now = format_timestamp(self.clock.now());

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO secrets
                 (id, name, type, ciphertext, iv, salt, tag, metadata, created_at, last_rotated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    id,
                    name,
                    secret_type.as_str(),
                    sealed.ciphertext,
                    sealed.iv,
                    sealed.salt,
                    sealed.tag,
                    metadata_json,
                    now,
                ],
            )?;
            Ok(())
        })?;

        tracing::info!(
            secret_id = id,
            secret_type = %secret_type,
            role = %metadata.role,
            "stored secret"
        );
        Ok(())
    }

    /// Unseal and return the current value of secret `id`.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the id is absent, [`VaultError::Integrity`]
    /// if the stored envelope fails authentication.
    pub fn reveal(&self, id: &str) -> Result<Zeroizing<String>> {
        let stored = self.stored_envelope(id)?;
        let plaintext = self.crypto.unseal(&stored.decode()?)?;
        let value = String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::Integrity {
            reason: "unsealed value is not valid UTF-8".into(),
        })?;

        tracing::debug!(secret_id = id, "revealed secret");
        Ok(Zeroizing::new(value))
    }

    /// Metadata view of secret `id` (no envelope).
    pub fn metadata_of(&self, id: &str) -> Result<SecretRecord> {
        let row = self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, type, metadata, created_at, last_rotated
                     FROM secrets WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(SecretRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            secret_type: row.get(2)?,
                            metadata: row.get(3)?,
                            created_at: row.get(4)?,
                            last_rotated: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })?;

        row.ok_or_else(|| VaultError::secret_not_found(id))?
            .into_record()
    }

    /// List every secret ordered by id. Never includes plaintext.
    pub fn list_all(&self) -> Result<Vec<SecretSummary>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, type, last_rotated FROM secrets ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let summaries = rows
            .into_iter()
            .map(|(id, name, secret_type, last_rotated)| {
                Ok(SecretSummary {
                    last_rotated: parse_timestamp(last_rotated.as_deref())?,
                    id,
                    name,
                    secret_type: SecretType::parse(&secret_type),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(count = summaries.len(), "listed secrets");
        Ok(summaries)
    }

    /// Reseal secret `id` with a new value and bump `last_rotated`.
    ///
    /// `created_at`, `name`, `type` and `metadata` are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NotFound`] if the id is absent.
    pub fn update_value(&self, id: &str, new_plaintext: &str) -> Result<()> {
        let sealed = self.crypto.seal(new_plaintext.as_bytes())?.encode();
        let now = format_timestamp(self.clock.now());

        let rows = self.db.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE secrets
                 SET ciphertext = ?1, iv = ?2, salt = ?3, tag = ?4, last_rotated = ?5
                 WHERE id = ?6",
                params![sealed.ciphertext, sealed.iv, sealed.salt, sealed.tag, now, id],
            )?;
            Ok(rows)
        })?;

        if rows == 0 {
            return Err(VaultError::secret_not_found(id));
        }

        tracing::info!(secret_id = id, "updated secret value");
        Ok(())
    }

    /// Raw persisted envelope columns for `id`, for inspection and tests.
    pub fn stored_envelope(&self, id: &str) -> Result<EncodedEnvelope> {
        self.db
            .with_conn(|conn| {
                let row = conn
                    .query_row(
                        "SELECT ciphertext, iv, salt, tag FROM secrets WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(EncodedEnvelope {
                                ciphertext: row.get(0)?,
                                iv: row.get(1)?,
                                salt: row.get(2)?,
                                tag: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })?
            .ok_or_else(|| VaultError::secret_not_found(id))
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Naive ISO-8601 values (no offset) are read as
/// UTC.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Result<DateTime<Utc>> {
    let raw = raw.ok_or_else(|| VaultError::Internal("missing timestamp".into()))?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| VaultError::Internal(format!("bad timestamp {raw:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Internal row types (avoid leaking rusqlite details)
// ---------------------------------------------------------------------------

struct SecretRow {
    id: String,
    name: String,
    secret_type: String,
    metadata: Option<String>,
    created_at: Option<String>,
    last_rotated: Option<String>,
}

impl SecretRow {
    fn into_record(self) -> Result<SecretRecord> {
        let metadata: SecretMetadata = serde_json::from_str(self.metadata.as_deref().unwrap_or("{}"))?;
        Ok(SecretRecord {
            created_at: parse_timestamp(self.created_at.as_deref())?,
            last_rotated: parse_timestamp(self.last_rotated.as_deref())?,
            secret_type: SecretType::parse(&self.secret_type),
            id: self.id,
            name: self.name,
            metadata,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
