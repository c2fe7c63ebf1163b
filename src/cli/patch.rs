//! CLI subcommand: `sudokey patch`
//!
//! Re-applies the policy (e.g. after switching to two-factor) without
//! registering a new credential.

use anyhow::Result;
use clap::Args;

use super::{PolicyArgs, Session};
use crate::enroll::Enrollment;

#[derive(Args)]
pub struct PatchArgs {
    /// Show what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

pub fn run(args: PatchArgs, session: &Session) -> Result<()> {
    let enrollment = Enrollment {
        stack_path: session.stack_path(&args.policy),
        policy: session.policy(&args.policy)?,
        credential: None,
        audit_dir: session.audit_dir(),
        lock: Some(session.lock()),
    };

    super::enroll::execute(&enrollment, args.dry_run)
}
