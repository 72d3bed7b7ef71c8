//! Runtime configuration for `pamctl`.
//!
//! Values are resolved from, lowest precedence first: built-in defaults, the
//! `[pam]` table of the TOML config file, then `PAM_*` environment variables
//! (a `.env` file is loaded into the environment beforehand).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use zeroize::Zeroizing;

const DEFAULT_DB_PATH: &str = "pam_vault.db";
const DEFAULT_AUDIT_LOG: &str = "audit.log";
const DEFAULT_POLICY_FILE: &str = "policies.toml";

const ENV_MASTER_KEY: &str = "PAM_MASTER_KEY";
const ENV_DB_PATH: &str = "PAM_DB_PATH";
const ENV_AUDIT_LOG: &str = "PAM_AUDIT_LOG";
const ENV_POLICY_FILE: &str = "PAM_POLICY_FILE";

/// Resolved settings.
pub struct PamConfig {
    pub master_key: Zeroizing<String>,
    pub db_path: PathBuf,
    pub audit_log_file: PathBuf,
    pub policy_file: PathBuf,
}

impl std::fmt::Debug for PamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PamConfig")
            .field("master_key", &"[REDACTED]")
            .field("db_path", &self.db_path)
            .field("audit_log_file", &self.audit_log_file)
            .field("policy_file", &self.policy_file)
            .finish()
    }
}

impl PamConfig {
    /// Load configuration using `config_file` (which may be absent) and the
    /// process environment.
    pub fn load(config_file: &Path) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "failed to load .env file");
            }
        }

        let table = read_pam_table(config_file)?;
        Self::resolve(table.as_ref(), |key| std::env::var(key).ok())
    }

    /// Merge the `[pam]` table and an environment lookup over the defaults.
    fn resolve(table: Option<&toml::Table>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let setting = |file_key: &str, env_key: &str| -> Option<String> {
            env(env_key).filter(|v| !v.is_empty()).or_else(|| {
                table
                    .and_then(|t| t.get(file_key))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
        };

        let Some(master_key) = setting("master_key", ENV_MASTER_KEY) else {
            bail!("master key is not configured: set {ENV_MASTER_KEY} or [pam].master_key");
        };

        Ok(Self {
            master_key: Zeroizing::new(master_key),
            db_path: setting("db_path", ENV_DB_PATH)
                .unwrap_or_else(|| DEFAULT_DB_PATH.into())
                .into(),
            audit_log_file: setting("audit_log_file", ENV_AUDIT_LOG)
                .unwrap_or_else(|| DEFAULT_AUDIT_LOG.into())
                .into(),
            policy_file: setting("policy_file", ENV_POLICY_FILE)
                .unwrap_or_else(|| DEFAULT_POLICY_FILE.into())
                .into(),
        })
    }
}

/// The `[pam]` table of `path`, or `None` if the file does not exist or has
/// no such table.
fn read_pam_table(path: &Path) -> Result<Option<toml::Table>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(None);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let mut table: toml::Table = content
        .parse()
        .with_context(|| format!("invalid TOML in {}", path.display()))?;
    match table.remove("pam") {
        Some(toml::Value::Table(pam)) => Ok(Some(pam)),
        Some(_) => bail!("[pam] in {} must be a table", path.display()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = PamConfig::resolve(None, env_of(&[(ENV_MASTER_KEY, "k")])).unwrap();
        assert_eq!(config.master_key.as_str(), "k");
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.audit_log_file, PathBuf::from(DEFAULT_AUDIT_LOG));
        assert_eq!(config.policy_file, PathBuf::from(DEFAULT_POLICY_FILE));
    }

    #[test]
    fn missing_master_key_is_an_error() {
        let err = PamConfig::resolve(None, env_of(&[])).unwrap_err();
        assert!(err.to_string().contains(ENV_MASTER_KEY));

        let blank = PamConfig::resolve(None, env_of(&[(ENV_MASTER_KEY, "")]));
        assert!(blank.is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let table: toml::Table = toml::from_str(
            r#"
            master_key = "from-file"
            db_path = "/var/lib/pam/vault.db"
            audit_log_file = "/var/log/pam/audit.log"
            "#,
        )
        .unwrap();

        let config = PamConfig::resolve(
            Some(&table),
            env_of(&[(ENV_DB_PATH, "/tmp/override.db")]),
        )
        .unwrap();
        assert_eq!(config.master_key.as_str(), "from-file");
        assert_eq!(config.db_path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.audit_log_file, PathBuf::from("/var/log/pam/audit.log"));
        assert_eq!(config.policy_file, PathBuf::from(DEFAULT_POLICY_FILE));
    }

    #[test]
    fn reads_pam_table_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pam.toml");
        std::fs::write(
            &path,
            "[other]\nx = 1\n\n[pam]\npolicy_file = \"conf/policies.toml\"\n",
        )
        .unwrap();

        let table = read_pam_table(&path).unwrap().unwrap();
        assert_eq!(table["policy_file"].as_str(), Some("conf/policies.toml"));

        assert!(read_pam_table(&dir.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn debug_hides_master_key() {
        let config = PamConfig::resolve(None, env_of(&[(ENV_MASTER_KEY, "hunter2")])).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
