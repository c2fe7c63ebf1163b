//! CLI subcommand: `sudokey line`

use anyhow::Result;
use clap::Args;

use super::{PolicyArgs, Session};
use crate::policy::synthesize;

#[derive(Args)]
pub struct LineArgs {
    #[command(flatten)]
    pub policy: PolicyArgs,
}

pub fn run(args: LineArgs, session: &Session) -> Result<()> {
    let policy = session.policy(&args.policy)?;
    println!("{}", synthesize(&policy));
    Ok(())
}
