//! Role-based access policy engine.
//!
//! Every secret carries a `role`. The engine maps `(user, role)` to a
//! [`Decision`]:
//!
//! 1. No policy for the role: [`Decision::Denied`] with
//!    [`DenyReason::RoleNotDefined`].
//! 2. The user is neither listed nor covered by the `"*"` wildcard:
//!    [`Decision::Denied`] with [`DenyReason::UserNotAuthorized`].
//! 3. Otherwise [`Decision::Allowed`], carrying whether a human approver is
//!    needed and the grant lifetime.
//!
//! The policy table is loaded once and never mutated afterwards. Evaluation
//! has no side effects.
//!
//! # Policy file
//!
//! ```toml
//! [[policies]]
//! role = "linux-admin"
//! approval_required = true
//! ttl_minutes = 15
//! rotation_hours = 24
//! allowed_users = ["alice", "bob"]
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Identity that matches every user.
pub const WILDCARD: &str = "*";

const DEFAULT_TTL_MINUTES: u32 = 15;

/// Policy table written to disk when no policy file exists yet.
pub const DEFAULT_POLICIES: &str = r#"[[policies]]
role = "linux-admin"
approval_required = true
ttl_minutes = 15
rotation_hours = 24
allowed_users = ["alice", "bob", "raouf"]

[[policies]]
role = "windows-admin"
approval_required = true
ttl_minutes = 30
rotation_hours = 12
allowed_users = ["raouf", "charlie"]

[[policies]]
role = "db-readonly"
approval_required = false
ttl_minutes = 60
rotation_hours = 168
allowed_users = ["*"]
"#;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Who may request a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum AllowedUsers {
    /// Any identity.
    Anyone,
    /// Only the listed identities.
    Only(BTreeSet<String>),
}

impl AllowedUsers {
    pub fn permits(&self, user: &str) -> bool {
        match self {
            Self::Anyone => true,
            Self::Only(users) => users.contains(user),
        }
    }
}

impl Default for AllowedUsers {
    fn default() -> Self {
        Self::Only(BTreeSet::new())
    }
}

impl From<Vec<String>> for AllowedUsers {
    fn from(users: Vec<String>) -> Self {
        if users.iter().any(|u| u == WILDCARD) {
            Self::Anyone
        } else {
            Self::Only(users.into_iter().collect())
        }
    }
}

impl From<AllowedUsers> for Vec<String> {
    fn from(users: AllowedUsers) -> Self {
        match users {
            AllowedUsers::Anyone => vec![WILDCARD.to_string()],
            AllowedUsers::Only(users) => users.into_iter().collect(),
        }
    }
}

/// A rule for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub role: String,

    /// Whether a human must approve each request.
    #[serde(default)]
    pub approval_required: bool,

    /// Lifetime of an approved ticket.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,

    /// Advisory rotation interval, consumed by the rotator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_hours: Option<u32>,

    #[serde(default)]
    pub allowed_users: AllowedUsers,
}

fn default_ttl_minutes() -> u32 {
    DEFAULT_TTL_MINUTES
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    RoleNotDefined,
    UserNotAuthorized,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleNotDefined => "role_not_defined",
            Self::UserNotAuthorized => "user_not_authorized",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RoleNotDefined => "role not defined",
            Self::UserNotAuthorized => "user not authorized for this role",
        })
    }
}

/// Outcome of [`PolicyEngine::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Denied {
        reason: DenyReason,
    },
    Allowed {
        approval_required: bool,
        ttl_minutes: u32,
    },
}

#[derive(Debug, Default, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    policies: Vec<Policy>,
}

// ---------------------------------------------------------------------------
// Policy Engine
// ---------------------------------------------------------------------------

/// Stateless decision function over an immutable role table.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policies: HashMap<String, Policy>,
}

impl PolicyEngine {
    /// Build an engine from a set of policies.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ConflictingPolicy`] if a role appears twice.
    pub fn new(policies: impl IntoIterator<Item = Policy>) -> Result<Self> {
        let mut table = HashMap::new();
        for policy in policies {
            let role = policy.role.clone();
            if table.insert(role.clone(), policy).is_some() {
                return Err(VaultError::ConflictingPolicy {
                    reason: format!("role {role:?} is defined more than once"),
                });
            }
        }
        tracing::debug!(roles = table.len(), "policy table loaded");
        Ok(Self { policies: table })
    }

    /// Parse a TOML policy document.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let doc: PolicyDocument = toml::from_str(document)?;
        Self::new(doc.policies)
    }

    /// The built-in table.
    pub fn defaults() -> Result<Self> {
        Self::from_toml_str(DEFAULT_POLICIES)
    }

    /// Load the policy file at `path`, writing the built-in table there first
    /// if it does not exist.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, DEFAULT_POLICIES)?;
            tracing::info!(path = %path.display(), "wrote default policy file");
        }

        let content = std::fs::read_to_string(path)?;
        let engine = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), roles = engine.policies.len(), "loaded policies");
        Ok(engine)
    }

    /// Decide whether `user` may request access under `role`.
    pub fn evaluate(&self, user: &str, role: &str) -> Decision {
        let decision = match self.policies.get(role) {
            None => Decision::Denied {
                reason: DenyReason::RoleNotDefined,
            },
            Some(policy) if !policy.allowed_users.permits(user) => Decision::Denied {
                reason: DenyReason::UserNotAuthorized,
            },
            Some(policy) => Decision::Allowed {
                approval_required: policy.approval_required,
                ttl_minutes: policy.ttl_minutes,
            },
        };

        tracing::debug!(user = user, role = role, decision = ?decision, "policy evaluated");
        decision
    }

    /// The policy for `role`, if defined.
    pub fn policy(&self, role: &str) -> Option<&Policy> {
        self.policies.get(role)
    }

    /// All policies ordered by role.
    pub fn policies(&self) -> Vec<&Policy> {
        let mut all: Vec<_> = self.policies.values().collect();
        all.sort_by(|a, b| a.role.cmp(&b.role));
        all
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PolicyEngine {
        PolicyEngine::defaults().unwrap()
    }

    #[test]
    fn undefined_role_is_denied() {
        assert_eq!(
            engine().evaluate("alice", "mainframe-admin"),
            Decision::Denied {
                reason: DenyReason::RoleNotDefined
            }
        );
    }

    #[test]
    fn unlisted_user_is_denied() {
        assert_eq!(
            engine().evaluate("mallory", "linux-admin"),
            Decision::Denied {
                reason: DenyReason::UserNotAuthorized
            }
        );
    }

    #[test]
    fn listed_user_gets_policy_terms() {
        assert_eq!(
            engine().evaluate("alice", "linux-admin"),
            Decision::Allowed {
                approval_required: true,
                ttl_minutes: 15
            }
        );
        assert_eq!(
            engine().evaluate("charlie", "windows-admin"),
            Decision::Allowed {
                approval_required: true,
                ttl_minutes: 30
            }
        );
    }

    #[test]
    fn wildcard_allows_any_user() {
        let engine = engine();
        for user in ["alice", "mallory", "", "svc-backup@corp"] {
            assert_eq!(
                engine.evaluate(user, "db-readonly"),
                Decision::Allowed {
                    approval_required: false,
                    ttl_minutes: 60
                }
            );
        }
    }

    #[test]
    fn wildcard_mixed_with_names_still_matches_everyone() {
        let engine = PolicyEngine::from_toml_str(
            r#"
            [[policies]]
            role = "ops"
            allowed_users = ["alice", "*"]
            "#,
        )
        .unwrap();

        assert!(matches!(engine.evaluate("zed", "ops"), Decision::Allowed { .. }));
    }

    #[test]
    fn omitted_fields_use_defaults() {
        let engine = PolicyEngine::from_toml_str(
            r#"
            [[policies]]
            role = "bare"
            "#,
        )
        .unwrap();

        let policy = engine.policy("bare").unwrap();
        assert!(!policy.approval_required);
        assert_eq!(policy.ttl_minutes, DEFAULT_TTL_MINUTES);
        assert_eq!(policy.rotation_hours, None);
        assert_eq!(
            engine.evaluate("alice", "bare"),
            Decision::Denied {
                reason: DenyReason::UserNotAuthorized
            }
        );
    }

    #[test]
    fn duplicate_role_is_conflicting() {
        let result = PolicyEngine::from_toml_str(
            r#"
            [[policies]]
            role = "ops"

            [[policies]]
            role = "ops"
            "#,
        );
        assert!(matches!(result, Err(VaultError::ConflictingPolicy { .. })));
    }

    #[test]
    fn malformed_document_is_a_format_error() {
        let result = PolicyEngine::from_toml_str("[[policies]]\nrole = 42\n");
        assert!(matches!(result, Err(VaultError::PolicyFormat(_))));
    }

    #[test]
    fn load_or_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("policies.toml");

        let engine = PolicyEngine::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(engine.policies().len(), 3);
        assert_eq!(engine.policy("linux-admin").unwrap().rotation_hours, Some(24));

        // A second load reads the file that is now on disk.
        std::fs::write(&path, "[[policies]]\nrole = \"only\"\nallowed_users = [\"*\"]\n").unwrap();
        let reloaded = PolicyEngine::load_or_init(&path).unwrap();
        assert_eq!(reloaded.policies().len(), 1);
    }

    #[test]
    fn decision_serializes_tagged() {
        let json = serde_json::to_value(Decision::Denied {
            reason: DenyReason::RoleNotDefined,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "decision": "denied", "reason": "role_not_defined" })
        );
    }
}
