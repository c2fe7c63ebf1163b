pub mod audit;
pub mod config;
pub mod enroll;
pub mod line;
pub mod mapping;
pub mod patch;
pub mod paths;
pub mod snapshots;
pub mod status;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;

use crate::concurrency::MutationLock;
use crate::config::{Config, PolicyOverrides};
use crate::paths::Paths;
use crate::policy::{PolicyConfig, PolicyMode, SystemHost};

#[derive(Parser)]
#[command(name = "sudokey")]
#[command(author, version, about = "Configure security-key (pam_u2f) authentication for sudo")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "SUDOKEY_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the pam_u2f line for the current policy
    Line(line::LineArgs),

    /// Store a credential and patch the stack (the full sequence)
    Enroll(enroll::EnrollArgs),

    /// Snapshot and patch the stack without touching credentials
    Patch(patch::PatchArgs),

    /// Credential mapping store operations
    Mapping(mapping::MappingArgs),

    /// Show what is currently configured
    Status(status::StatusArgs),

    /// List rollback snapshots of the stack file
    Snapshots(snapshots::SnapshotsArgs),

    /// Show the mutation audit log
    Audit(audit::AuditArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}

/// Per-invocation policy flags, layered over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// passwordless: key alone is enough; two-factor: key and password
    #[arg(long, value_enum)]
    pub mode: Option<PolicyMode>,

    /// Print a touch prompt while waiting for the key
    #[arg(long, overrides_with = "no_cue")]
    pub cue: bool,

    /// Wait for the key silently
    #[arg(long, overrides_with = "cue")]
    pub no_cue: bool,

    /// Credential mapping store
    #[arg(long, value_name = "PATH")]
    pub authfile: Option<PathBuf>,

    /// Origin the credentials are bound to (default: pam://<hostname>)
    #[arg(long, value_name = "ID")]
    pub origin: Option<String>,

    /// PAM stack file to patch
    #[arg(long, value_name = "PATH")]
    pub stack: Option<PathBuf>,
}

impl PolicyArgs {
    pub fn overrides(&self) -> PolicyOverrides {
        let cue = match (self.cue, self.no_cue) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        PolicyOverrides {
            mode: self.mode,
            cue,
            authfile: self.authfile.clone(),
            origin: self.origin.clone(),
            stack: self.stack.clone(),
        }
    }
}

/// Resolved paths and config shared by the mutating commands.
pub struct Session {
    pub paths: Paths,
    pub config: Config,
}

impl Session {
    pub fn policy(&self, args: &PolicyArgs) -> Result<PolicyConfig> {
        Ok(self
            .config
            .resolve_policy(&args.overrides(), &SystemHost)?)
    }

    pub fn stack_path(&self, args: &PolicyArgs) -> PathBuf {
        self.config.resolve_stack_path(&args.overrides())
    }

    /// State directory for audit entries, unless auditing is off.
    pub fn audit_dir(&self) -> Option<PathBuf> {
        self.config
            .audit
            .enabled
            .then(|| self.paths.state_dir.clone())
    }

    pub fn lock(&self) -> MutationLock {
        MutationLock::from_paths(&self.paths)
    }
}

/// `--record` if given, otherwise one line from stdin.
pub fn read_record(record: Option<String>, user: &str) -> Result<String> {
    if let Some(record) = record {
        return Ok(record);
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprintln!(
            "Paste the registration line for '{}' (pamu2fcfg output) and press Enter:",
            user
        );
    }

    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("Failed to read credential record from stdin")?;
    if line.trim().is_empty() {
        anyhow::bail!("No credential record given (use --record or pipe it on stdin)");
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cue_flags_override_each_other() {
        let cli = Cli::try_parse_from(["sudokey", "line", "--no-cue", "--cue"]).unwrap();
        let Commands::Line(args) = cli.command else {
            panic!("expected line");
        };
        assert_eq!(args.policy.overrides().cue, Some(true));

        let cli = Cli::try_parse_from(["sudokey", "line", "--no-cue"]).unwrap();
        let Commands::Line(args) = cli.command else {
            panic!("expected line");
        };
        assert_eq!(args.policy.overrides().cue, Some(false));
    }

    #[test]
    fn enroll_parses_policy_flags() {
        let cli = Cli::try_parse_from([
            "sudokey",
            "enroll",
            "--user",
            "alice",
            "--mode",
            "two-factor",
            "--stack",
            "/tmp/sudo",
            "--dry-run",
        ])
        .unwrap();
        let Commands::Enroll(args) = cli.command else {
            panic!("expected enroll");
        };
        assert_eq!(args.user, "alice");
        assert!(args.dry_run);
        let overrides = args.policy.overrides();
        assert_eq!(overrides.mode, Some(PolicyMode::TwoFactor));
        assert_eq!(overrides.cue, None);
        assert_eq!(overrides.stack, Some(PathBuf::from("/tmp/sudo")));
    }
}
