//! CLI subcommand: `sudokey snapshots`
//!
//! Snapshots are never deleted by sudokey. Rolling back is a manual copy.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::Session;
use crate::stack;

#[derive(Args)]
pub struct SnapshotsArgs {
    /// PAM stack file whose snapshots to list
    #[arg(long, value_name = "PATH")]
    pub stack: Option<PathBuf>,
}

pub fn run(args: SnapshotsArgs, session: &Session) -> Result<()> {
    let stack_path = args.stack.unwrap_or_else(|| session.config.stack_path());
    let snapshots = stack::list_snapshots(&stack_path)?;

    let Some(latest) = snapshots.last() else {
        println!("No snapshots of {}", stack_path.display());
        return Ok(());
    };

    println!(
        "Snapshots of {} ({}, oldest first):",
        stack_path.display(),
        snapshots.len()
    );
    for snapshot in &snapshots {
        println!("  {}", snapshot.display());
    }
    println!();
    println!(
        "Restore the latest with: cp {} {}",
        latest.display(),
        stack_path.display()
    );
    Ok(())
}
