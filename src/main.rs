use anyhow::Result;
use clap::Parser;

use sudokey::cli::{self, Cli, Commands, Session};
use sudokey::config::Config;
use sudokey::paths::Paths;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::resolve()?;
    let explicit = cli.config.as_deref();
    let verbose = cli.verbose;

    // Loaded per command: `config` and `paths` must work without a valid config
    let session = || -> Result<Session> {
        let config = Config::load(&paths, explicit)?;
        init_logging(verbose, Some(&config.logging.level));
        Ok(Session {
            paths: paths.clone(),
            config,
        })
    };

    match cli.command {
        Commands::Line(args) => cli::line::run(args, &session()?),
        Commands::Enroll(args) => cli::enroll::run(args, &session()?),
        Commands::Patch(args) => cli::patch::run(args, &session()?),
        Commands::Mapping(args) => cli::mapping::run(args, &session()?),
        Commands::Status(args) => cli::status::run(args, &session()?),
        Commands::Snapshots(args) => cli::snapshots::run(args, &session()?),
        Commands::Audit(args) => cli::audit::run(args, &session()?),
        Commands::Config(args) => {
            init_logging(verbose, None);
            cli::config::run(args, &paths, explicit)
        }
        Commands::Paths => {
            init_logging(verbose, None);
            cli::paths::run(&paths, explicit)
        }
    }
}

/// RUST_LOG wins, then --verbose, then the configured level.
fn init_logging(verbose: bool, configured: Option<&str>) {
    let log_level = if verbose {
        "debug"
    } else {
        configured.unwrap_or("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
