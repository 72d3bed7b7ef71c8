//! CLI argument definitions for `pamctl`.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Privileged access vault operator CLI.
#[derive(Parser)]
#[command(
    name = "pamctl",
    version,
    about = "Privileged access vault: store, request, approve, reveal, rotate",
    long_about = "Operates a local privileged access vault. Secrets are sealed with AES-256-GCM \
                  and released only against approved, time-boxed access tickets. Every action \
                  is written to the audit log."
)]
pub struct Cli {
    /// Identity to act as. Taken as given; there is no authentication.
    #[arg(long, short, env = "PAM_USER", global = true)]
    pub user: Option<String>,

    /// Path to the TOML config file.
    #[arg(long, default_value = "config/pam.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seed the vault with demo secrets.
    Init,

    /// Store a secret (replaces an existing one with the same id).
    Add {
        /// Secret identifier.
        id: String,

        /// Human readable name.
        #[arg(long)]
        name: String,

        /// Secret type: linux, windows, database, or any other label.
        #[arg(long = "type", default_value = "linux")]
        secret_type: String,

        /// Role the access policy is looked up by.
        #[arg(long)]
        role: String,

        /// Extra metadata, e.g. `--attr host=10.0.0.5`.
        #[arg(long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,

        /// Secret value. Read from stdin when omitted.
        #[arg(long)]
        value: Option<String>,
    },

    /// List secrets (never shows values).
    List,

    /// Show a secret's metadata.
    Show {
        /// Secret identifier.
        id: String,
    },

    /// Request access to a secret.
    Request {
        /// Secret identifier.
        secret_id: String,

        /// Why access is needed.
        #[arg(long, default_value = "Maintenance")]
        reason: String,
    },

    /// Approve a pending ticket.
    Approve {
        /// Ticket identifier.
        ticket_id: String,
    },

    /// Deny a pending ticket.
    Deny {
        /// Ticket identifier.
        ticket_id: String,
    },

    /// Show a ticket.
    Ticket {
        /// Ticket identifier.
        ticket_id: String,
    },

    /// Reveal a secret using an approved ticket.
    Reveal {
        /// Ticket identifier.
        ticket_id: String,
    },

    /// Rotate a secret, or every secret due for rotation.
    Rotate {
        /// Secret identifier.
        #[arg(required_unless_present = "due", conflicts_with = "due")]
        secret_id: Option<String>,

        /// Rotate every secret whose rotation interval has elapsed.
        #[arg(long)]
        due: bool,
    },

    /// Show recent audit events.
    Audit {
        /// Number of events to show.
        #[arg(long, short, default_value_t = 50)]
        limit: usize,
    },

    /// Show the loaded access policies.
    Policies,
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        return Err("attribute key must not be empty".into());
    }
    Ok((key.to_string(), value.to_string()))
}
