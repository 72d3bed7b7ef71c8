//! Access ticket state machine.
//!
//! A ticket records one user's request for one secret:
//!
//! ```text
//! PENDING ──approve──▶ APPROVED (approver, decided_at, expires_at)
//!    │
//!    └────deny──────▶ DENIED   (approver, decided_at)
//! ```
//!
//! Both decided states are terminal. The PENDING → decided transition is a
//! compare-and-set performed by the [`TicketStore`], so when two approvers
//! race only the first decision lands and the loser gets the winner's ticket
//! back unchanged.
//!
//! [`AccessWorkflow::authorize_reveal`] is the only gate in front of
//! [`Vault::reveal`](crate::store::Vault::reveal). Expiry is checked lazily at
//! that point; nothing sweeps tickets in the background.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::db::ConnectionSource;
use crate::error::{Result, VaultError};
use crate::store::{format_timestamp, parse_timestamp};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Coarse ticket status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    Approved,
    Denied,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket state with the fields each state carries.
///
/// `expires_at` exists only on [`TicketState::Approved`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketState {
    Pending,
    Approved {
        approver: String,
        decided_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    Denied {
        approver: String,
        decided_at: DateTime<Utc>,
    },
}

impl TicketState {
    pub fn status(&self) -> TicketStatus {
        match self {
            Self::Pending => TicketStatus::Pending,
            Self::Approved { .. } => TicketStatus::Approved,
            Self::Denied { .. } => TicketStatus::Denied,
        }
    }
}

/// One request for temporary access to one secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTicket {
    pub id: String,
    pub requester: String,
    pub secret_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: TicketState,
}

impl AccessTicket {
    pub fn status(&self) -> TicketStatus {
        self.state.status()
    }

    pub fn approver(&self) -> Option<&str> {
        match &self.state {
            TicketState::Pending => None,
            TicketState::Approved { approver, .. } | TicketState::Denied { approver, .. } => {
                Some(approver)
            }
        }
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TicketState::Pending => None,
            TicketState::Approved { decided_at, .. } | TicketState::Denied { decided_at, .. } => {
                Some(*decided_at)
            }
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TicketState::Approved { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }
}

/// Approver's choice on a pending ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approve,
    Deny,
}

/// Result of a decide attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// This call moved the ticket out of PENDING.
    Applied(AccessTicket),
    /// The ticket was already decided; it is returned as it stands.
    Unchanged(AccessTicket),
}

impl Settlement {
    pub fn ticket(&self) -> &AccessTicket {
        match self {
            Self::Applied(t) | Self::Unchanged(t) => t,
        }
    }

    pub fn into_ticket(self) -> AccessTicket {
        match self {
            Self::Applied(t) | Self::Unchanged(t) => t,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

// ---------------------------------------------------------------------------
// Ticket storage
// ---------------------------------------------------------------------------

/// Owned ticket collection with an atomic PENDING → decided transition.
pub trait TicketStore: Send + Sync {
    /// Insert a new ticket. Ids are never reused.
    fn insert(&self, ticket: &AccessTicket) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<AccessTicket>>;

    /// Replace the state of ticket `id` with `decided` if and only if it is
    /// still PENDING. Returns `None` if there is no such ticket.
    fn settle(&self, id: &str, decided: TicketState) -> Result<Option<Settlement>>;
}

/// In-process ticket store.
///
/// `settle` holds the entry's shard lock across the check and the write, so
/// deciding is atomic per ticket while different tickets proceed in parallel.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    tickets: DashMap<String, AccessTicket>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketStore for MemoryTicketStore {
    fn insert(&self, ticket: &AccessTicket) -> Result<()> {
        match self.tickets.entry(ticket.id.clone()) {
            Entry::Occupied(_) => Err(VaultError::Internal(format!(
                "ticket id collision: {}",
                ticket.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(ticket.clone());
                Ok(())
            }
        }
    }

    fn get(&self, id: &str) -> Result<Option<AccessTicket>> {
        Ok(self.tickets.get(id).map(|t| t.clone()))
    }

    fn settle(&self, id: &str, decided: TicketState) -> Result<Option<Settlement>> {
        let Some(mut ticket) = self.tickets.get_mut(id) else {
            return Ok(None);
        };
        if ticket.state != TicketState::Pending {
            return Ok(Some(Settlement::Unchanged(ticket.clone())));
        }
        ticket.state = decided;
        Ok(Some(Settlement::Applied(ticket.clone())))
    }
}

/// SQLite-backed ticket store, so tickets outlive a single process.
///
/// The transition is a single `UPDATE … WHERE status = 'PENDING'`; SQLite's
/// write lock makes it a compare-and-set across connections and processes.
pub struct SqliteTicketStore {
    db: ConnectionSource,
}

impl std::fmt::Debug for SqliteTicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTicketStore")
            .field("db", &self.db.describe())
            .finish()
    }
}

impl SqliteTicketStore {
    /// Open (or create) the ticket table in the database at `path`. This may
    /// be the same file the [`Vault`](crate::store::Vault) uses.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let store = Self {
            db: ConnectionSource::file(path.as_ref()),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            db: ConnectionSource::memory()?,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS access_tickets (
                    id         TEXT PRIMARY KEY,
                    requester  TEXT NOT NULL,
                    secret_id  TEXT NOT NULL,
                    reason     TEXT NOT NULL,
                    status     TEXT NOT NULL CHECK(status IN ('PENDING','APPROVED','DENIED')),
                    created_at TEXT NOT NULL,
                    approver   TEXT,
                    decided_at TEXT,
                    expires_at TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_tickets_requester ON access_tickets(requester);",
            )?;
            Ok(())
        })
    }

    fn fetch(conn: &rusqlite::Connection, id: &str) -> Result<Option<AccessTicket>> {
        let row = conn
            .query_row(
                "SELECT id, requester, secret_id, reason, status, created_at, approver, decided_at, expires_at
                 FROM access_tickets WHERE id = ?1",
                params![id],
                |row| {
                    Ok(TicketRow {
                        id: row.get(0)?,
                        requester: row.get(1)?,
                        secret_id: row.get(2)?,
                        reason: row.get(3)?,
                        status: row.get(4)?,
                        created_at: row.get(5)?,
                        approver: row.get(6)?,
                        decided_at: row.get(7)?,
                        expires_at: row.get(8)?,
                    })
                },
            )
            .optional()?;
        row.map(TicketRow::into_ticket).transpose()
    }
}

impl TicketStore for SqliteTicketStore {
    fn insert(&self, ticket: &AccessTicket) -> Result<()> {
        let row = TicketRow::from_ticket(ticket);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO access_tickets
                 (id, requester, secret_id, reason, status, created_at, approver, decided_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id,
                    row.requester,
                    row.secret_id,
                    row.reason,
                    row.status,
                    row.created_at,
                    row.approver,
                    row.decided_at,
                    row.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: &str) -> Result<Option<AccessTicket>> {
        self.db.with_conn(|conn| Self::fetch(conn, id))
    }

    fn settle(&self, id: &str, decided: TicketState) -> Result<Option<Settlement>> {
        let (status, approver, decided_at, expires_at) = match &decided {
            TicketState::Pending => {
                return Err(VaultError::Internal("cannot settle a ticket to PENDING".into()));
            }
            TicketState::Approved {
                approver,
                decided_at,
                expires_at,
            } => (
                TicketStatus::Approved,
                approver,
                decided_at,
                Some(format_timestamp(*expires_at)),
            ),
            TicketState::Denied {
                approver,
                decided_at,
            } => (TicketStatus::Denied, approver, decided_at, None),
        };

        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE access_tickets
                 SET status = ?1, approver = ?2, decided_at = ?3, expires_at = ?4
                 WHERE id = ?5 AND status = 'PENDING'",
                params![
                    status.as_str(),
                    approver,
                    format_timestamp(*decided_at),
                    expires_at,
                    id
                ],
            )?;

            // Decided states are terminal, so this read sees the final state.
            Ok(Self::fetch(conn, id)?.map(|ticket| {
                if changed == 1 {
                    Settlement::Applied(ticket)
                } else {
                    Settlement::Unchanged(ticket)
                }
            }))
        })
    }
}

struct TicketRow {
    id: String,
    requester: String,
    secret_id: String,
    reason: String,
    status: String,
    created_at: String,
    approver: Option<String>,
    decided_at: Option<String>,
    expires_at: Option<String>,
}

impl TicketRow {
    fn from_ticket(ticket: &AccessTicket) -> Self {
        Self {
            id: ticket.id.clone(),
            requester: ticket.requester.clone(),
            secret_id: ticket.secret_id.clone(),
            reason: ticket.reason.clone(),
            status: ticket.status().as_str().to_string(),
            created_at: format_timestamp(ticket.created_at),
            approver: ticket.approver().map(str::to_string),
            decided_at: ticket.decided_at().map(format_timestamp),
            expires_at: ticket.expires_at().map(format_timestamp),
        }
    }

    fn into_ticket(self) -> Result<AccessTicket> {
        let corrupt = |what: &str| VaultError::Internal(format!("ticket {}: {what}", self.id));
        let state = match self.status.as_str() {
            "PENDING" => TicketState::Pending,
            "APPROVED" => TicketState::Approved {
                approver: self.approver.clone().ok_or_else(|| corrupt("approved without approver"))?,
                decided_at: parse_timestamp(self.decided_at.as_deref())?,
                expires_at: parse_timestamp(Some(
                    self.expires_at
                        .as_deref()
                        .ok_or_else(|| corrupt("approved without expiry"))?,
                ))?,
            },
            "DENIED" => TicketState::Denied {
                approver: self.approver.clone().ok_or_else(|| corrupt("denied without approver"))?,
                decided_at: parse_timestamp(self.decided_at.as_deref())?,
            },
            other => return Err(corrupt(&format!("unknown status {other:?}"))),
        };

        Ok(AccessTicket {
            created_at: parse_timestamp(Some(&self.created_at))?,
            id: self.id,
            requester: self.requester,
            secret_id: self.secret_id,
            reason: self.reason,
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Drives tickets through their lifecycle.
pub struct AccessWorkflow<S: TicketStore = MemoryTicketStore> {
    tickets: S,
    clock: Arc<dyn Clock>,
}

impl Default for AccessWorkflow<MemoryTicketStore> {
    fn default() -> Self {
        Self::new(MemoryTicketStore::new())
    }
}

impl<S: TicketStore> AccessWorkflow<S> {
    pub fn new(tickets: S) -> Self {
        Self {
            tickets,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open a PENDING ticket and return its id.
    ///
    /// Policy is not consulted here; routing on the policy decision is the
    /// caller's job.
    pub fn create_ticket(&self, user: &str, secret_id: &str, reason: &str) -> Result<String> {
        let ticket = AccessTicket {
            id: Uuid::new_v4().simple().to_string(),
            requester: user.to_string(),
            secret_id: secret_id.to_string(),
            reason: reason.to_string(),
            created_at: self.clock.now(),
            state: TicketState::Pending,
        };
        self.tickets.insert(&ticket)?;

        tracing::info!(ticket_id = %ticket.id, user = user, secret_id = secret_id, "ticket created");
        Ok(ticket.id)
    }

    /// Decide a ticket, reporting whether this call was the one that decided
    /// it.
    pub fn try_decide(
        &self,
        ticket_id: &str,
        verdict: Verdict,
        approver: &str,
        ttl_minutes: u32,
    ) -> Result<Settlement> {
        let now = self.clock.now();
        let decided = match verdict {
            Verdict::Approve => TicketState::Approved {
                approver: approver.to_string(),
                decided_at: now,
                expires_at: now + Duration::minutes(i64::from(ttl_minutes)),
            },
            Verdict::Deny => TicketState::Denied {
                approver: approver.to_string(),
                decided_at: now,
            },
        };

        let settlement = self
            .tickets
            .settle(ticket_id, decided)?
            .ok_or_else(|| VaultError::ticket_not_found(ticket_id))?;

        if settlement.was_applied() {
            tracing::info!(
                ticket_id = ticket_id,
                approver = approver,
                status = %settlement.ticket().status(),
                "ticket decided"
            );
        } else {
            tracing::debug!(
                ticket_id = ticket_id,
                status = %settlement.ticket().status(),
                "ticket already decided, ignoring"
            );
        }
        Ok(settlement)
    }

    /// Decide a ticket. A ticket that is already decided is returned
    /// unchanged.
    pub fn decide(
        &self,
        ticket_id: &str,
        verdict: Verdict,
        approver: &str,
        ttl_minutes: u32,
    ) -> Result<AccessTicket> {
        Ok(self
            .try_decide(ticket_id, verdict, approver, ttl_minutes)?
            .into_ticket())
    }

    /// True only if the ticket exists, is APPROVED, belongs to
    /// `requesting_user`, and has not expired.
    pub fn authorize_reveal(&self, ticket_id: &str, requesting_user: &str) -> Result<bool> {
        let Some(ticket) = self.tickets.get(ticket_id)? else {
            return Ok(false);
        };
        if ticket.requester != requesting_user {
            return Ok(false);
        }
        let TicketState::Approved { expires_at, .. } = ticket.state else {
            return Ok(false);
        };
        Ok(self.clock.now() <= expires_at)
    }

    pub fn get(&self, ticket_id: &str) -> Result<AccessTicket> {
        self.tickets
            .get(ticket_id)?
            .ok_or_else(|| VaultError::ticket_not_found(ticket_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::clock::ManualClock;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn workflow_at(clock: &Arc<ManualClock>) -> AccessWorkflow {
        AccessWorkflow::default().with_clock(clock.clone())
    }

    #[test]
    fn new_ticket_is_pending_without_expiry() {
        let workflow = AccessWorkflow::default();
        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();

        let ticket = workflow.get(&id).unwrap();
        assert_eq!(ticket.status(), TicketStatus::Pending);
        assert_eq!(ticket.expires_at(), None);
        assert_eq!(ticket.approver(), None);
        assert_eq!(ticket.requester, "alice");
    }

    #[test]
    fn ticket_ids_are_unique() {
        let workflow = AccessWorkflow::default();
        let a = workflow.create_ticket("alice", "S1", "r").unwrap();
        let b = workflow.create_ticket("alice", "S1", "r").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn approve_sets_expiry_from_ttl() {
        let clock = Arc::new(ManualClock::new(start()));
        let workflow = workflow_at(&clock);
        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();

        let ticket = workflow.decide(&id, Verdict::Approve, "admin", 15).unwrap();
        assert_eq!(ticket.status(), TicketStatus::Approved);
        assert_eq!(ticket.approver(), Some("admin"));
        assert_eq!(ticket.decided_at(), Some(start()));
        assert_eq!(ticket.expires_at(), Some(start() + Duration::minutes(15)));
    }

    #[test]
    fn deny_leaves_expiry_empty() {
        let workflow = AccessWorkflow::default();
        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();

        let ticket = workflow.decide(&id, Verdict::Deny, "admin", 15).unwrap();
        assert_eq!(ticket.status(), TicketStatus::Denied);
        assert_eq!(ticket.expires_at(), None);
        assert!(!workflow.authorize_reveal(&id, "alice").unwrap());
    }

    #[test]
    fn second_decide_is_a_no_op() {
        let workflow = AccessWorkflow::default();
        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();

        let first = workflow.try_decide(&id, Verdict::Approve, "admin", 15).unwrap();
        let second = workflow.try_decide(&id, Verdict::Deny, "other-admin", 60).unwrap();

        assert!(first.was_applied());
        assert!(!second.was_applied());
        assert_eq!(second.ticket(), first.ticket());
        assert_eq!(workflow.get(&id).unwrap().status(), TicketStatus::Approved);
    }

    #[test]
    fn decide_unknown_ticket_is_not_found() {
        let workflow = AccessWorkflow::default();
        assert!(matches!(
            workflow.decide("missing", Verdict::Approve, "admin", 15),
            Err(VaultError::NotFound { entity: "ticket", .. })
        ));
        assert!(matches!(workflow.get("missing"), Err(VaultError::NotFound { .. })));
    }

    #[test]
    fn reveal_gate_honours_expiry_boundary() {
        let clock = Arc::new(ManualClock::new(start()));
        let workflow = workflow_at(&clock);
        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();
        workflow.decide(&id, Verdict::Approve, "admin", 15).unwrap();

        clock.set(start() + Duration::minutes(15) - Duration::seconds(1));
        assert!(workflow.authorize_reveal(&id, "alice").unwrap());

        clock.set(start() + Duration::minutes(15));
        assert!(workflow.authorize_reveal(&id, "alice").unwrap());

        clock.set(start() + Duration::minutes(15) + Duration::seconds(1));
        assert!(!workflow.authorize_reveal(&id, "alice").unwrap());
    }

    #[test]
    fn reveal_gate_binds_identity() {
        let workflow = AccessWorkflow::default();
        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();
        workflow.decide(&id, Verdict::Approve, "admin", 15).unwrap();

        assert!(workflow.authorize_reveal(&id, "alice").unwrap());
        assert!(!workflow.authorize_reveal(&id, "bob").unwrap());
        assert!(!workflow.authorize_reveal(&id, "admin").unwrap());
    }

    #[test]
    fn reveal_gate_refuses_pending_and_unknown() {
        let workflow = AccessWorkflow::default();
        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();

        assert!(!workflow.authorize_reveal(&id, "alice").unwrap());
        assert!(!workflow.authorize_reveal("no-such-ticket", "alice").unwrap());
    }

    #[test]
    fn racing_approvers_settle_exactly_once() {
        let workflow = Arc::new(AccessWorkflow::default());
        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();
        let racers = 8;
        let barrier = Arc::new(Barrier::new(racers));

        let handles: Vec<_> = (0..racers)
            .map(|i| {
                let workflow = Arc::clone(&workflow);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                std::thread::spawn(move || {
                    let verdict = if i % 2 == 0 { Verdict::Approve } else { Verdict::Deny };
                    barrier.wait();
                    workflow
                        .try_decide(&id, verdict, &format!("admin-{i}"), 15)
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<Settlement> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = outcomes.iter().filter(|s| s.was_applied()).collect();
        assert_eq!(winners.len(), 1);

        let final_ticket = workflow.get(&id).unwrap();
        assert_eq!(&final_ticket, winners[0].ticket());
        assert!(outcomes.iter().all(|s| s.ticket() == &final_ticket));
    }

    #[test]
    fn sqlite_store_round_trips_and_settles_once() {
        let clock = Arc::new(ManualClock::new(start()));
        let workflow =
            AccessWorkflow::new(SqliteTicketStore::open_in_memory().unwrap()).with_clock(clock.clone());

        let id = workflow.create_ticket("alice", "S1", "maint").unwrap();
        assert_eq!(workflow.get(&id).unwrap().status(), TicketStatus::Pending);

        let approved = workflow.try_decide(&id, Verdict::Approve, "admin", 30).unwrap();
        assert!(approved.was_applied());
        assert_eq!(
            approved.ticket().expires_at(),
            Some(start() + Duration::minutes(30))
        );

        let again = workflow.try_decide(&id, Verdict::Deny, "admin", 30).unwrap();
        assert!(!again.was_applied());
        assert_eq!(again.ticket().status(), TicketStatus::Approved);

        assert!(workflow.authorize_reveal(&id, "alice").unwrap());
        assert!(matches!(
            workflow.decide("missing", Verdict::Deny, "admin", 1),
            Err(VaultError::NotFound { .. })
        ));
    }

    #[test]
    fn sqlite_tickets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.db");

        let id = {
            let workflow = AccessWorkflow::new(SqliteTicketStore::open(&path).unwrap());
            let id = workflow.create_ticket("bob", "S2", "incident").unwrap();
            workflow.decide(&id, Verdict::Deny, "admin", 15).unwrap();
            id
        };

        let workflow = AccessWorkflow::new(SqliteTicketStore::open(&path).unwrap());
        let ticket = workflow.get(&id).unwrap();
        assert_eq!(ticket.status(), TicketStatus::Denied);
        assert_eq!(ticket.approver(), Some("admin"));
        assert_eq!(ticket.reason, "incident");
    }

    #[test]
    fn ticket_serializes_with_flat_status() {
        let ticket = AccessTicket {
            id: "t1".into(),
            requester: "alice".into(),
            secret_id: "S1".into(),
            reason: "maint".into(),
            created_at: start(),
            state: TicketState::Pending,
        };
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert!(json.get("expires_at").is_none());
    }
}
