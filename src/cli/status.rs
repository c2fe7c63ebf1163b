//! CLI subcommand: `sudokey status`

use anyhow::Result;
use clap::Args;

use super::{PolicyArgs, Session};
use crate::audit;
use crate::status;

#[derive(Args)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

pub fn run(args: StatusArgs, session: &Session) -> Result<()> {
    let policy = session.policy(&args.policy)?;
    let report = status::gather(&session.stack_path(&args.policy), &policy)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("sudokey status:");
    println!("  Stack:      {}", report.stack_path.display());
    match report.owned_lines.as_slice() {
        [] => println!("  pam_u2f:    not configured"),
        [line] => {
            let state = if report.is_current() {
                "matches policy"
            } else {
                "differs from policy (run `sudokey patch`)"
            };
            println!("  pam_u2f:    line {}, {}", line, state);
        }
        lines => println!(
            "  pam_u2f:    DUPLICATED on lines {:?}; remove the extras by hand",
            lines
        ),
    }
    if let Some(current) = &report.current_line
        && !report.is_current()
    {
        println!("    current:  {}", current);
    }
    println!("    policy:   {}", report.expected_line);
    if let Some(mode) = report.stack_mode {
        println!("  Mode:       {:o}", mode);
    }

    println!("  Mapping:    {}", report.mapping_store.display());
    if report.identities.is_empty() {
        println!("  Users:      none enrolled");
    } else {
        println!("  Users:      {}", report.identities.join(", "));
    }

    match &report.latest_snapshot {
        Some(latest) => println!(
            "  Snapshots:  {} (latest {})",
            report.snapshot_count,
            latest.display()
        ),
        None => println!("  Snapshots:  none"),
    }

    if session.config.audit.enabled {
        let state_dir = &session.paths.state_dir;
        let entries = audit::read_audit_log(state_dir)?;
        if entries.is_empty() {
            println!("  Audit Log:  Empty");
        } else {
            let broken = audit::verify_audit_chain(state_dir)?;
            let chain_status = if broken.is_empty() {
                "chain intact"
            } else {
                "CHAIN BROKEN"
            };
            println!("  Audit Log:  {} entries, {}", entries.len(), chain_status);
        }
    } else {
        println!("  Audit Log:  disabled");
    }

    Ok(())
}
