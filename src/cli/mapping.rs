//! CLI subcommand: `sudokey mapping`

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;
use tracing::warn;

use super::{Session, read_record};
use crate::audit::{self, AuditAction};
use crate::enroll::NewCredential;
use crate::mapping::{self, MergeOutcome};

#[derive(Args)]
pub struct MappingArgs {
    #[command(subcommand)]
    pub command: MappingCommands,
}

#[derive(Subcommand)]
pub enum MappingCommands {
    /// Store a credential without touching the stack
    Merge {
        /// User whose credential is being registered
        #[arg(short, long)]
        user: String,

        /// Registration line (`user:credential`); read from stdin if omitted
        #[arg(short, long)]
        record: Option<String>,

        /// Credential mapping store
        #[arg(long, value_name = "PATH")]
        authfile: Option<PathBuf>,
    },

    /// List users with a stored credential
    List {
        /// Credential mapping store
        #[arg(long, value_name = "PATH")]
        authfile: Option<PathBuf>,
    },
}

pub fn run(args: MappingArgs, session: &Session) -> Result<()> {
    match args.command {
        MappingCommands::Merge {
            user,
            record,
            authfile,
        } => merge(session, user, record, authfile),
        MappingCommands::List { authfile } => list(session, authfile),
    }
}

fn merge(
    session: &Session,
    user: String,
    record: Option<String>,
    authfile: Option<PathBuf>,
) -> Result<()> {
    let raw = read_record(record, &user)?;
    let credential = NewCredential::new(user, &raw)?;
    let store = authfile.unwrap_or_else(|| session.config.mapping_path());

    let _guard = session.lock().acquire_or_wait()?;
    let outcome = mapping::merge(&store, &credential.identity, &credential.record)?;

    if let Some(dir) = session.audit_dir() {
        let sha = std::fs::read(&store)
            .map(|bytes| audit::sha256_hex(&bytes))
            .unwrap_or_default();
        if let Err(e) = audit::append_audit_entry(
            &dir,
            AuditAction::RecordMerged,
            &store,
            &sha,
            Some(&credential.identity),
        ) {
            warn!("Failed to write audit entry: {}", e);
        }
    }

    let verb = match outcome {
        MergeOutcome::Added => "Added",
        MergeOutcome::Replaced { .. } => "Replaced",
    };
    println!(
        "{} credential for '{}' in {}",
        verb,
        credential.identity,
        store.display()
    );
    Ok(())
}

fn list(session: &Session, authfile: Option<PathBuf>) -> Result<()> {
    let store = authfile.unwrap_or_else(|| session.config.mapping_path());
    let identities = mapping::identities(&store)?;

    if identities.is_empty() {
        println!("No credentials in {}", store.display());
        return Ok(());
    }

    println!("Credentials in {} ({}):", store.display(), identities.len());
    for identity in identities {
        println!("  {}", identity);
    }
    Ok(())
}
