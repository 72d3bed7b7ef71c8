//! CLI entry point for the privileged access vault.
//!
//! This binary provides the `pamctl` command. Each invocation opens the vault
//! database, the policy file and the audit log named by [`config::PamConfig`],
//! runs one subcommand and exits.

mod cli;
mod config;

use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use pam_vault::audit::JsonlAuditLog;
use pam_vault::rotation::Rotator;
use pam_vault::workflow::SqliteTicketStore;
use pam_vault::{
    AccessBroker, AccessOutcome, AccessWorkflow, NewSecret, PolicyEngine, SecretMetadata,
    SecretType, Vault, Verdict,
};

use crate::cli::{Cli, Commands};
use crate::config::PamConfig;

/// Everything a subcommand needs, opened from the resolved config.
struct App {
    broker: AccessBroker<SqliteTicketStore>,
    vault: Arc<Vault>,
    audit: Arc<JsonlAuditLog>,
}

impl App {
    fn open(config: &PamConfig) -> Result<Self> {
        let vault = Arc::new(
            Vault::open(&config.db_path, config.master_key.as_bytes())
                .with_context(|| format!("failed to open vault {}", config.db_path.display()))?,
        );
        let policies = Arc::new(
            PolicyEngine::load_or_init(&config.policy_file).with_context(|| {
                format!("failed to load policies {}", config.policy_file.display())
            })?,
        );
        let tickets = SqliteTicketStore::open(&config.db_path).context("failed to open ticket store")?;
        let audit = Arc::new(JsonlAuditLog::new(&config.audit_log_file));

        let broker = AccessBroker::new(
            vault.clone(),
            policies,
            AccessWorkflow::new(tickets),
            audit.clone(),
        );
        Ok(Self { broker, vault, audit })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info");

    let config = PamConfig::load(&cli.config)?;
    tracing::debug!(config = ?config, "configuration loaded");
    let app = App::open(&config)?;
    let user = || {
        cli.user
            .as_deref()
            .context("no identity given: pass --user or set PAM_USER")
    };

    match &cli.command {
        Commands::Init => cmd_init(&app, user()?),
        Commands::Add {
            id,
            name,
            secret_type,
            role,
            attributes,
            value,
        } => {
            let value = match value {
                Some(v) => Zeroizing::new(v.clone()),
                None => read_value_from_stdin()?,
            };
            let mut metadata = SecretMetadata::new(role.as_str());
            for (key, attr) in attributes {
                metadata = metadata.with_attribute(key.as_str(), attr.as_str());
            }
            let secret = NewSecret {
                id: id.clone(),
                name: name.clone(),
                secret_type: SecretType::parse(secret_type),
                value,
                metadata,
            };
            app.broker.store_secret(user()?, &secret)?;
            println!("Stored secret {id}");
            Ok(())
        }
        Commands::List => cmd_list(&app, user()?),
        Commands::Show { id } => {
            let record = app.vault.metadata_of(id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Commands::Request { secret_id, reason } => cmd_request(&app, user()?, secret_id, reason),
        Commands::Approve { ticket_id } => cmd_decide(&app, user()?, ticket_id, Verdict::Approve),
        Commands::Deny { ticket_id } => cmd_decide(&app, user()?, ticket_id, Verdict::Deny),
        Commands::Ticket { ticket_id } => {
            let ticket = app.broker.ticket(ticket_id)?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
            Ok(())
        }
        Commands::Reveal { ticket_id } => {
            let secret = app.broker.reveal(user()?, ticket_id)?;
            println!("Secret:     {}", secret.secret_id);
            println!("Password:   {}", secret.value.as_str());
            if let Some(expires_at) = secret.expires_at {
                println!("Expires at: {}", expires_at.to_rfc3339());
            }
            Ok(())
        }
        Commands::Rotate { secret_id, due } => {
            cmd_rotate(&app, user()?, secret_id.as_deref(), *due).await
        }
        Commands::Audit { limit } => cmd_audit(&app, user()?, *limit),
        Commands::Policies => cmd_policies(&app),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_init(app: &App, user: &str) -> Result<()> {
    let demo = [
        (
            "linux-prod-01",
            "Linux Production Server",
            SecretType::Linux,
            "InitialPass123!",
            SecretMetadata::new("linux-admin")
                .with_attribute("host", "192.168.1.10")
                .with_attribute("username", "root"),
        ),
        (
            "win-db-01",
            "Windows Database Server",
            SecretType::Windows,
            "WinAdminPass!",
            SecretMetadata::new("windows-admin")
                .with_attribute("host", "192.168.1.20")
                .with_attribute("username", "Administrator"),
        ),
        (
            "db-reporting",
            "Reporting Database",
            SecretType::Database,
            "ReportsRead0nly!",
            SecretMetadata::new("db-readonly")
                .with_attribute("host", "postgres://192.168.1.30:5432/reports")
                .with_attribute("username", "reporter"),
        ),
    ];

    for (id, name, secret_type, value, metadata) in demo {
        app.broker.store_secret(
            user,
            &NewSecret {
                id: id.to_string(),
                name: name.to_string(),
                secret_type,
                value: Zeroizing::new(value.to_string()),
                metadata,
            },
        )?;
        println!("Created secret: {id}");
    }
    Ok(())
}

fn cmd_list(app: &App, user: &str) -> Result<()> {
    let secrets = app.broker.list_secrets(user)?;
    if secrets.is_empty() {
        println!("No secrets stored. Run `pamctl init` to add demo data.");
        return Ok(());
    }

    println!("{:<20} {:<30} {:<10} LAST ROTATED", "ID", "NAME", "TYPE");
    for s in secrets {
        println!(
            "{:<20} {:<30} {:<10} {}",
            s.id,
            s.name,
            s.secret_type,
            s.last_rotated.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn cmd_request(app: &App, user: &str, secret_id: &str, reason: &str) -> Result<()> {
    match app.broker.request_access(user, secret_id, reason)? {
        AccessOutcome::Denied { reason } => {
            println!("Request status: denied ({reason})");
        }
        AccessOutcome::Pending { ticket } => {
            println!("Request status: pending approval");
            println!("Ticket ID:      {}", ticket.id);
        }
        AccessOutcome::Approved { ticket } => {
            println!("Request status: approved");
            println!("Ticket ID:      {}", ticket.id);
            println!("Use `pamctl reveal {}` to retrieve the password.", ticket.id);
        }
    }
    Ok(())
}

fn cmd_decide(app: &App, approver: &str, ticket_id: &str, verdict: Verdict) -> Result<()> {
    let ticket = app.broker.decide_request(approver, ticket_id, verdict)?;
    println!("Ticket {} is {}", ticket.id, ticket.status());
    if let Some(expires_at) = ticket.expires_at() {
        println!("Valid until {}", expires_at.to_rfc3339());
    }
    Ok(())
}

async fn cmd_rotate(app: &App, user: &str, secret_id: Option<&str>, due: bool) -> Result<()> {
    let rotator = Rotator::with_simulators(app.vault.clone(), app.audit.clone());

    if due {
        let results = rotator.rotate_due(app.broker.policies(), user).await?;
        if results.is_empty() {
            println!("No secrets due for rotation.");
        }
        for result in results {
            match result.outcome {
                Ok(report) => println!("Rotated {} on {}", result.secret_id, report.host),
                Err(e) => println!("Failed  {}: {e}", result.secret_id),
            }
        }
        return Ok(());
    }

    let secret_id = secret_id.context("a secret id is required unless --due is given")?;
    let report = rotator.rotate(secret_id, user).await?;
    println!("Successfully rotated {secret_id} on {}", report.host);
    Ok(())
}

fn cmd_audit(app: &App, user: &str, limit: usize) -> Result<()> {
    let events = app.broker.audit_events(user, limit)?;
    println!(
        "{:<20} {:<12} {:<18} {:<20} SUCCESS",
        "TIME", "USER", "ACTION", "SECRET"
    );
    for event in events {
        println!(
            "{:<20} {:<12} {:<18} {:<20} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.user,
            event.action.to_string(),
            event.secret_id.as_deref().unwrap_or("-"),
            if event.success { "yes" } else { "no" }
        );
    }
    Ok(())
}

fn cmd_policies(app: &App) -> Result<()> {
    println!(
        "{:<16} {:<9} {:<6} {:<9} USERS",
        "ROLE", "APPROVAL", "TTL", "ROTATION"
    );
    for policy in app.broker.policies().policies() {
        let users: Vec<String> = policy.allowed_users.clone().into();
        println!(
            "{:<16} {:<9} {:<6} {:<9} {}",
            policy.role,
            if policy.approval_required { "yes" } else { "no" },
            format!("{}m", policy.ttl_minutes),
            policy
                .rotation_hours
                .map(|h| format!("{h}h"))
                .unwrap_or_else(|| "-".into()),
            users.join(", ")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_value_from_stdin() -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read secret value from stdin")?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    anyhow::ensure!(!trimmed.is_empty(), "secret value must not be empty");
    Ok(Zeroizing::new(trimmed.to_string()))
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}
