//! Access broker.
//!
//! [`AccessBroker`] is the single entry point callers use to touch secrets. It
//! wires the [`Vault`], the [`PolicyEngine`], the [`AccessWorkflow`] and an
//! [`AuditSink`] together so that every grant goes through the same path:
//!
//! ```text
//! request_access ──► policy ──► ticket (PENDING) ──► decide ──► reveal
//!                                   │                             ▲
//!                                   └── auto-approve (SYSTEM) ────┘
//! ```
//!
//! Roles where the policy does not require approval still get a ticket; it is
//! approved immediately by [`SYSTEM_APPROVER`] so the reveal gate and the
//! audit trail look the same for both routes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, VaultError};
use crate::policy::{Decision, DenyReason, PolicyEngine};
use crate::store::{SecretMetadata, SecretSummary, SecretType, Vault};
use crate::workflow::{
    AccessTicket, AccessWorkflow, MemoryTicketStore, TicketStatus, TicketStore, Verdict,
};

/// Approver identity recorded on auto-approved tickets.
pub const SYSTEM_APPROVER: &str = "SYSTEM";

/// A secret to be stored through the broker.
pub struct NewSecret {
    pub id: String,
    pub name: String,
    pub secret_type: SecretType,
    pub value: Zeroizing<String>,
    pub metadata: SecretMetadata,
}

impl std::fmt::Debug for NewSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewSecret")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("secret_type", &self.secret_type)
            .field("value", &"[REDACTED]")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Result of [`AccessBroker::request_access`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccessOutcome {
    /// Policy refused the request; no ticket was created.
    Denied { reason: DenyReason },
    /// A ticket is waiting for a human approver.
    Pending { ticket: AccessTicket },
    /// The ticket was approved by [`SYSTEM_APPROVER`] on creation.
    Approved { ticket: AccessTicket },
}

impl AccessOutcome {
    pub fn ticket(&self) -> Option<&AccessTicket> {
        match self {
            Self::Denied { .. } => None,
            Self::Pending { ticket } | Self::Approved { ticket } => Some(ticket),
        }
    }
}

/// A plaintext value released against an approved ticket.
pub struct RevealedSecret {
    pub secret_id: String,
    pub value: Zeroizing<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for RevealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevealedSecret")
            .field("secret_id", &self.secret_id)
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct AccessBroker<S: TicketStore = MemoryTicketStore> {
    vault: Arc<Vault>,
    policies: Arc<PolicyEngine>,
    workflow: AccessWorkflow<S>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl<S: TicketStore> AccessBroker<S> {
    pub fn new(
        vault: Arc<Vault>,
        policies: Arc<PolicyEngine>,
        workflow: AccessWorkflow<S>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            vault,
            policies,
            workflow,
            audit,
            clock: Arc::new(SystemClock),
        }
    }

    /// Time source for audit event timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn policies(&self) -> &PolicyEngine {
        &self.policies
    }

    pub fn ticket(&self, ticket_id: &str) -> Result<AccessTicket> {
        self.workflow.get(ticket_id)
    }

    fn event(&self, action: AuditAction, user: &str) -> AuditEvent {
        AuditEvent::new(self.clock.now(), action, user)
    }

    // -- Secrets ------------------------------------------------------------

    pub fn store_secret(&self, actor: &str, secret: &NewSecret) -> Result<()> {
        self.vault.put(
            &secret.id,
            &secret.name,
            &secret.secret_type,
            &secret.value,
            &secret.metadata,
        )?;
        self.audit.record(
            &self
                .event(AuditAction::CreateSecret, actor)
                .secret(&secret.id)
                .detail("type", secret.secret_type.as_str())
                .detail("role", secret.metadata.role.as_str()),
        )
    }

    pub fn list_secrets(&self, actor: &str) -> Result<Vec<SecretSummary>> {
        let secrets = self.vault.list_all()?;
        self.audit.record(
            &self
                .event(AuditAction::ListSecrets, actor)
                .detail("count", secrets.len()),
        )?;
        Ok(secrets)
    }

    // -- Access lifecycle ---------------------------------------------------

    /// Ask for access to `secret_id`.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the secret does not exist. A policy refusal
    /// is not an error; it is reported as [`AccessOutcome::Denied`].
    pub fn request_access(
        &self,
        user: &str,
        secret_id: &str,
        reason: &str,
    ) -> Result<AccessOutcome> {
        let record = self.vault.metadata_of(secret_id)?;
        let role = record.metadata.role.as_str();

        match self.policies.evaluate(user, role) {
            Decision::Denied { reason: deny } => {
                tracing::warn!(user = user, secret_id = secret_id, role = role, reason = %deny, "access request denied by policy");
                self.audit.record(
                    &self
                        .event(AuditAction::AccessDenied, user)
                        .secret(secret_id)
                        .failed()
                        .detail("reason", deny.as_str())
                        .detail("role", role),
                )?;
                Ok(AccessOutcome::Denied { reason: deny })
            }
            Decision::Allowed {
                approval_required: true,
                ..
            } => {
                let ticket_id = self.workflow.create_ticket(user, secret_id, reason)?;
                self.audit.record(
                    &self
                        .event(AuditAction::RequestCreated, user)
                        .secret(secret_id)
                        .detail("req_id", ticket_id.as_str())
                        .detail("reason", reason),
                )?;
                Ok(AccessOutcome::Pending {
                    ticket: self.workflow.get(&ticket_id)?,
                })
            }
            Decision::Allowed {
                approval_required: false,
                ttl_minutes,
            } => {
                let ticket_id = self.workflow.create_ticket(user, secret_id, reason)?;
                let ticket =
                    self.workflow
                        .decide(&ticket_id, Verdict::Approve, SYSTEM_APPROVER, ttl_minutes)?;
                self.audit.record(
                    &self
                        .event(AuditAction::AutoApproved, SYSTEM_APPROVER)
                        .secret(secret_id)
                        .detail("req_id", ticket_id.as_str())
                        .detail("requester", user)
                        .detail("ttl_minutes", ttl_minutes),
                )?;
                Ok(AccessOutcome::Approved { ticket })
            }
        }
    }

    /// Approve or deny a pending ticket.
    ///
    /// An approval is re-checked against the current policy for the
    /// requester; if the requester is no longer allowed the ticket is denied
    /// instead. Deciding an already decided ticket changes nothing and is
    /// audited as a failed attempt. A decision on an unknown ticket is
    /// audited before the error is returned.
    pub fn decide_request(
        &self,
        approver: &str,
        ticket_id: &str,
        verdict: Verdict,
    ) -> Result<AccessTicket> {
        let ticket = match self.workflow.get(ticket_id) {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(ticket_id = ticket_id, error = %e, "ticket lookup failed for decision");
                self.audit.record(
                    &self
                        .event(decision_action(verdict), approver)
                        .failed()
                        .detail("req_id", ticket_id)
                        .detail("error", e.kind()),
                )?;
                return Err(e);
            }
        };
        if ticket.status() != TicketStatus::Pending {
            self.record_redecision(approver, verdict, &ticket)?;
            return Ok(ticket);
        }

        let (effective, ttl_minutes, revoked) = match verdict {
            Verdict::Deny => (Verdict::Deny, 0, None),
            Verdict::Approve => {
                let record = self.vault.metadata_of(&ticket.secret_id)?;
                match self.policies.evaluate(&ticket.requester, &record.metadata.role) {
                    Decision::Allowed { ttl_minutes, .. } => (Verdict::Approve, ttl_minutes, None),
                    Decision::Denied { reason } => (Verdict::Deny, 0, Some(reason)),
                }
            }
        };

        let settlement = self
            .workflow
            .try_decide(ticket_id, effective, approver, ttl_minutes)?;
        if !settlement.was_applied() {
            // Another approver settled it between the read and the swap.
            let ticket = settlement.into_ticket();
            self.record_redecision(approver, verdict, &ticket)?;
            return Ok(ticket);
        }
        let ticket = settlement.into_ticket();

        let mut event = self
            .event(decision_action(effective), approver)
            .secret(&ticket.secret_id)
            .detail("req_id", ticket_id)
            .detail("requester", ticket.requester.as_str());
        if let Some(reason) = revoked {
            tracing::warn!(ticket_id = ticket_id, reason = %reason, "approval overridden by current policy");
            event = event.detail("policy_denied", reason.as_str());
        }
        if let Some(expires_at) = ticket.expires_at() {
            event = event.detail("expires_at", expires_at.to_rfc3339());
        }
        self.audit.record(&event)?;

        Ok(ticket)
    }

    fn record_redecision(&self, approver: &str, verdict: Verdict, ticket: &AccessTicket) -> Result<()> {
        self.audit.record(
            &self
                .event(decision_action(verdict), approver)
                .secret(&ticket.secret_id)
                .failed()
                .detail("req_id", ticket.id.as_str())
                .detail("requester", ticket.requester.as_str())
                .detail("already_decided", true)
                .detail("status", ticket.status().as_str()),
        )
    }

    /// Release the plaintext behind an approved, unexpired ticket owned by
    /// `user`.
    ///
    /// # Errors
    ///
    /// [`VaultError::AccessDenied`] when the gate refuses the ticket. Store
    /// errors ([`VaultError::NotFound`], [`VaultError::Integrity`]) propagate
    /// unchanged.
    pub fn reveal(&self, user: &str, ticket_id: &str) -> Result<RevealedSecret> {
        if !self.workflow.authorize_reveal(ticket_id, user)? {
            tracing::warn!(user = user, ticket_id = ticket_id, "reveal refused");
            self.audit.record(
                &self
                    .event(AuditAction::RetrievalFailed, user)
                    .failed()
                    .detail("req_id", ticket_id)
                    .detail("reason", "invalid_or_expired"),
            )?;
            return Err(VaultError::AccessDenied {
                ticket_id: ticket_id.to_string(),
            });
        }

        let ticket = self.workflow.get(ticket_id)?;
        match self.vault.reveal(&ticket.secret_id) {
            Ok(value) => {
                self.audit.record(
                    &self
                        .event(AuditAction::SecretRetrieved, user)
                        .secret(&ticket.secret_id)
                        .detail("req_id", ticket_id),
                )?;
                let expires_at = ticket.expires_at();
                Ok(RevealedSecret {
                    secret_id: ticket.secret_id,
                    value,
                    expires_at,
                })
            }
            Err(e) => {
                tracing::error!(secret_id = %ticket.secret_id, error = %e, "reveal failed after approval");
                self.audit.record(
                    &self
                        .event(AuditAction::RetrievalFailed, user)
                        .secret(&ticket.secret_id)
                        .failed()
                        .detail("req_id", ticket_id)
                        .detail("error", e.kind()),
                )?;
                Err(e)
            }
        }
    }

    /// The last `limit` audit events. Reading the trail is itself audited.
    pub fn audit_events(&self, actor: &str, limit: usize) -> Result<Vec<AuditEvent>> {
        let events = self.audit.recent(limit)?;
        self.audit.record(
            &self
                .event(AuditAction::AuditAccess, actor)
                .detail("limit", limit),
        )?;
        Ok(events)
    }
}

fn decision_action(verdict: Verdict) -> AuditAction {
    match verdict {
        Verdict::Approve => AuditAction::RequestApproved,
        Verdict::Deny => AuditAction::RequestDenied,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::clock::ManualClock;

    struct Fixture {
        broker: AccessBroker,
        audit: Arc<MemoryAuditLog>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let vault = Vault::open_in_memory("test-master").unwrap().with_clock(clock.clone());
        let workflow = AccessWorkflow::default().with_clock(clock.clone());
        let audit = Arc::new(MemoryAuditLog::new());
        let broker = AccessBroker::new(
            Arc::new(vault),
            Arc::new(PolicyEngine::defaults().unwrap()),
            workflow,
            audit.clone(),
        )
        .with_clock(clock.clone());

        for (id, secret_type, role) in [
            ("linux-prod-01", SecretType::Linux, "linux-admin"),
            ("db-finance", SecretType::Database, "db-readonly"),
            ("orphan", SecretType::Linux, "mainframe-admin"),
        ] {
            broker
                .store_secret(
                    "setup",
                    &NewSecret {
                        id: id.into(),
                        name: id.into(),
                        secret_type,
                        value: Zeroizing::new(format!("{id}-pw")),
                        metadata: SecretMetadata::new(role),
                    },
                )
                .unwrap();
        }

        Fixture { broker, audit, clock }
    }

    fn actions(audit: &MemoryAuditLog) -> Vec<AuditAction> {
        audit.events().iter().map(|e| e.action).collect()
    }

    #[test]
    fn approval_required_role_goes_pending() {
        let f = fixture();
        let outcome = f.broker.request_access("alice", "linux-prod-01", "patching").unwrap();

        let AccessOutcome::Pending { ticket } = outcome else {
            panic!("expected pending, got {outcome:?}");
        };
        assert_eq!(ticket.status(), TicketStatus::Pending);
        assert_eq!(actions(&f.audit).last(), Some(&AuditAction::RequestCreated));
    }

    #[test]
    fn unlisted_user_is_denied_without_ticket() {
        let f = fixture();
        let outcome = f.broker.request_access("mallory", "linux-prod-01", "").unwrap();
        assert_eq!(
            outcome,
            AccessOutcome::Denied {
                reason: DenyReason::UserNotAuthorized
            }
        );

        let last = f.audit.events().pop().unwrap();
        assert_eq!(last.action, AuditAction::AccessDenied);
        assert!(!last.success);
    }

    #[test]
    fn undefined_role_is_denied() {
        let f = fixture();
        let outcome = f.broker.request_access("alice", "orphan", "").unwrap();
        assert_eq!(
            outcome,
            AccessOutcome::Denied {
                reason: DenyReason::RoleNotDefined
            }
        );
    }

    #[test]
    fn unknown_secret_is_not_found() {
        let f = fixture();
        let err = f.broker.request_access("alice", "nope", "").unwrap_err();
        assert!(matches!(err, VaultError::NotFound { entity: "secret", .. }));
    }

    #[test]
    fn auto_approval_is_by_system() {
        let f = fixture();
        let outcome = f.broker.request_access("anyone", "db-finance", "report").unwrap();

        let AccessOutcome::Approved { ticket } = outcome else {
            panic!("expected approved, got {outcome:?}");
        };
        assert_eq!(ticket.approver(), Some(SYSTEM_APPROVER));
        assert_eq!(ticket.expires_at(), Some(f.clock.now() + Duration::minutes(60)));

        let revealed = f.broker.reveal("anyone", &ticket.id).unwrap();
        assert_eq!(revealed.value.as_str(), "db-finance-pw");
    }

    #[test]
    fn human_approval_then_reveal() {
        let f = fixture();
        let ticket = f
            .broker
            .request_access("alice", "linux-prod-01", "patching")
            .unwrap()
            .ticket()
            .cloned()
            .unwrap();

        let err = f.broker.reveal("alice", &ticket.id).unwrap_err();
        assert!(matches!(err, VaultError::AccessDenied { .. }));

        let decided = f.broker.decide_request("admin", &ticket.id, Verdict::Approve).unwrap();
        assert_eq!(decided.status(), TicketStatus::Approved);
        assert_eq!(decided.expires_at(), Some(f.clock.now() + Duration::minutes(15)));

        let revealed = f.broker.reveal("alice", &ticket.id).unwrap();
        assert_eq!(revealed.secret_id, "linux-prod-01");
        assert_eq!(revealed.value.as_str(), "linux-prod-01-pw");
        assert!(!format!("{revealed:?}").contains("linux-prod-01-pw"));

        assert_eq!(
            &actions(&f.audit)[3..],
            [
                AuditAction::RequestCreated,
                AuditAction::RetrievalFailed,
                AuditAction::RequestApproved,
                AuditAction::SecretRetrieved,
            ]
        );
    }

    #[test]
    fn redeciding_is_audited_as_noop() {
        let f = fixture();
        let ticket_id = f
            .broker
            .request_access("bob", "linux-prod-01", "")
            .unwrap()
            .ticket()
            .map(|t| t.id.clone())
            .unwrap();

        f.broker.decide_request("admin", &ticket_id, Verdict::Deny).unwrap();
        let again = f.broker.decide_request("admin", &ticket_id, Verdict::Approve).unwrap();
        assert_eq!(again.status(), TicketStatus::Denied);

        let last = f.audit.events().pop().unwrap();
        assert!(!last.success);
        assert_eq!(last.details["already_decided"], true);
        assert_eq!(last.details["status"], "DENIED");
    }

    #[test]
    fn redeciding_after_policy_change_keeps_status_and_action() {
        let mut f = fixture();
        let ticket_id = f
            .broker
            .request_access("alice", "linux-prod-01", "")
            .unwrap()
            .ticket()
            .map(|t| t.id.clone())
            .unwrap();
        f.broker.decide_request("admin", &ticket_id, Verdict::Approve).unwrap();

        // alice has since been removed from the role.
        f.broker.policies = Arc::new(
            PolicyEngine::from_toml_str(
                r#"
[[policies]]
role = "linux-admin"
approval_required = true
ttl_minutes = 15
allowed_users = ["bob"]
"#,
            )
            .unwrap(),
        );

        let again = f.broker.decide_request("admin", &ticket_id, Verdict::Approve).unwrap();
        assert_eq!(again.status(), TicketStatus::Approved);

        let last = f.audit.events().pop().unwrap();
        assert_eq!(last.action, AuditAction::RequestApproved);
        assert!(!last.success);
        assert_eq!(last.details["status"], "APPROVED");
        assert!(!last.details.contains_key("policy_denied"));
    }

    #[test]
    fn deciding_unknown_ticket_is_audited() {
        let f = fixture();
        let before = f.audit.events().len();

        let err = f.broker.decide_request("admin", "nope", Verdict::Approve).unwrap_err();
        assert!(matches!(err, VaultError::NotFound { entity: "ticket", .. }));

        let events = f.audit.events();
        assert_eq!(events.len(), before + 1);
        let last = events.last().unwrap();
        assert_eq!(last.action, AuditAction::RequestApproved);
        assert_eq!(last.user, "admin");
        assert!(!last.success);
        assert_eq!(last.details["req_id"], "nope");
        assert_eq!(last.details["error"], "not_found");
    }

    #[test]
    fn other_user_cannot_reveal() {
        let f = fixture();
        let ticket = f
            .broker
            .request_access("alice", "db-finance", "")
            .unwrap()
            .ticket()
            .cloned()
            .unwrap();

        let err = f.broker.reveal("mallory", &ticket.id).unwrap_err();
        assert!(matches!(err, VaultError::AccessDenied { .. }));
    }

    #[test]
    fn expired_ticket_is_refused() {
        let f = fixture();
        let ticket = f
            .broker
            .request_access("alice", "db-finance", "")
            .unwrap()
            .ticket()
            .cloned()
            .unwrap();

        f.clock.advance(Duration::minutes(60));
        assert!(f.broker.reveal("alice", &ticket.id).is_ok());

        f.clock.advance(Duration::seconds(1));
        assert!(matches!(
            f.broker.reveal("alice", &ticket.id),
            Err(VaultError::AccessDenied { .. })
        ));
    }

    #[test]
    fn audit_read_is_itself_audited() {
        let f = fixture();
        let before = f.broker.audit_events("auditor", 100).unwrap();
        assert_eq!(before.len(), 3);

        let after = f.broker.audit_events("auditor", 1).unwrap();
        assert_eq!(after[0].action, AuditAction::AuditAccess);
    }
}
