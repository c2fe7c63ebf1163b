//! CLI subcommand: `sudokey audit`

use anyhow::Result;
use clap::Args;

use super::Session;
use crate::audit;

#[derive(Args)]
pub struct AuditArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Filter by action type (e.g., stack_patched, mutation_aborted)
    #[arg(long)]
    pub filter: Option<String>,
}

pub fn run(args: AuditArgs, session: &Session) -> Result<()> {
    let state_dir = &session.paths.state_dir;
    let mut entries = audit::read_audit_log(state_dir)?;

    if let Some(ref filter_action) = args.filter {
        entries.retain(|e| e.action.as_str() == filter_action);
    }

    if entries.is_empty() {
        if args.filter.is_some() {
            println!("No audit log entries matching filter.");
        } else {
            println!("No audit log entries.");
        }
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    // Verify chain integrity on the full log, not the filtered view
    let broken = audit::verify_audit_chain(state_dir)?;

    match args.filter {
        Some(ref f) => println!("Audit Log ({} entries, filter: {}):", entries.len(), f),
        None => println!("Audit Log ({} entries):", entries.len()),
    }
    println!();

    for entry in &entries {
        let sha = if entry.content_sha256.len() >= 16 {
            &entry.content_sha256[..16]
        } else {
            &entry.content_sha256
        };
        let detail = entry
            .detail
            .as_deref()
            .map(|d| format!(" ({})", d))
            .unwrap_or_default();
        println!(
            "  {} {} {} sha256:{}{}",
            entry.ts,
            entry.action.as_str(),
            entry.target,
            sha,
            detail
        );
    }

    println!();
    if broken.is_empty() {
        println!("Chain integrity: INTACT");
    } else {
        println!(
            "Chain integrity: BROKEN at {} position(s): {:?}",
            broken.len(),
            broken
        );
    }

    Ok(())
}
