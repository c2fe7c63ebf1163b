//! CLI subcommand: `sudokey paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::paths::Paths;

pub fn run(paths: &Paths, explicit: Option<&Path>) -> Result<()> {
    println!("sudokey Paths (XDG Base Directory)");
    println!("==================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    match explicit {
        Some(path) => println!("  config.toml:    {} (--config)", path.display()),
        None => println!("  config.toml:    {}", paths.config_file().display()),
    }
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  audit log:      {}", paths.audit_log().display());
    println!();
    match paths.runtime_dir {
        Some(ref dir) => println!("Runtime:    {}", dir.display()),
        None => println!("Runtime:    (not available)"),
    }
    println!("  mutation lock:  {}", paths.mutation_lock().display());

    // Managed files come from the config, not from XDG
    let config_file = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths.config_file());
    let config = if config_file.exists() {
        Config::load_from(&config_file)?
    } else {
        Config::default()
    };
    println!();
    println!("Managed:");
    println!("  stack file:     {}", config.stack_path().display());
    println!("  mapping store:  {}", config.mapping_path().display());

    Ok(())
}
