use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::paths::Paths;
use crate::policy::{self, HostSource, PolicyConfig, PolicyMode};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stack: StackConfig,

    #[serde(default)]
    pub mapping: MappingConfig,

    #[serde(default)]
    pub policy: PolicySection,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// PAM stack file that receives the pam_u2f line
    #[serde(default = "default_stack_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Credential mapping store referenced by `authfile=`
    #[serde(default = "default_mapping_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    /// "passwordless" (key alone is enough) or "two-factor" (key + password)
    #[serde(default)]
    pub mode: PolicyMode,

    /// Ask pam_u2f to print a touch prompt
    #[serde(default = "default_true")]
    pub cue: bool,

    /// Origin override; default is pam://<fqdn or hostname>
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Record every mutation in the hash-chained audit log
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_stack_path() -> String {
    crate::stack::DEFAULT_STACK_FILE.to_string()
}
fn default_mapping_path() -> String {
    policy::DEFAULT_MAPPING_STORE.to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            path: default_stack_path(),
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            path: default_mapping_path(),
        }
    }
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            mode: PolicyMode::default(),
            cue: default_true(),
            origin: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

/// Per-invocation values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub mode: Option<PolicyMode>,
    pub cue: Option<bool>,
    pub authfile: Option<PathBuf>,
    pub origin: Option<String>,
    pub stack: Option<PathBuf>,
}

impl Config {
    /// Load the config file, creating it from the template on first run.
    ///
    /// An explicitly requested file (`--config`) must already exist.
    pub fn load(paths: &Paths, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file {} does not exist", path.display());
            }
            return Self::load_from(path);
        }

        let path = paths.config_file();
        if !path.exists() {
            paths.ensure_dirs()?;
            Self::save_template(&path)?;
            return Ok(Config::default());
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Save the commented template (for first-time setup)
    pub fn save_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn stack_path(&self) -> PathBuf {
        expand(&self.stack.path)
    }

    pub fn mapping_path(&self) -> PathBuf {
        expand(&self.mapping.path)
    }

    /// Stack file after applying an override.
    pub fn resolve_stack_path(&self, overrides: &PolicyOverrides) -> PathBuf {
        overrides
            .stack
            .clone()
            .unwrap_or_else(|| self.stack_path())
    }

    /// Fold config and overrides into the immutable policy.
    ///
    /// The host is only consulted when no origin is configured or passed.
    pub fn resolve_policy(
        &self,
        overrides: &PolicyOverrides,
        host: &dyn HostSource,
    ) -> crate::Result<PolicyConfig> {
        let mode = overrides.mode.unwrap_or(self.policy.mode);
        let cue = overrides.cue.unwrap_or(self.policy.cue);
        let authfile = overrides
            .authfile
            .clone()
            .unwrap_or_else(|| self.mapping_path());
        let origin = match overrides.origin.clone().or_else(|| self.policy.origin.clone()) {
            Some(origin) => origin,
            None => policy::origin_identifier(host)?,
        };

        PolicyConfig::new(mode, cue, authfile, origin)
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["stack", "path"] => Ok(self.stack.path.clone()),
            ["mapping", "path"] => Ok(self.mapping.path.clone()),
            ["policy", "mode"] => Ok(self.policy.mode.to_string()),
            ["policy", "cue"] => Ok(self.policy.cue.to_string()),
            ["policy", "origin"] => Ok(self.policy.origin.clone().unwrap_or_default()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["audit", "enabled"] => Ok(self.audit.enabled.to_string()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["stack", "path"] => self.stack.path = value.to_string(),
            ["mapping", "path"] => self.mapping.path = value.to_string(),
            ["policy", "mode"] => {
                self.policy.mode = <PolicyMode as clap::ValueEnum>::from_str(value, true)
                    .map_err(|e| anyhow::anyhow!("Invalid policy.mode '{}': {}", value, e))?
            }
            ["policy", "cue"] => self.policy.cue = value.parse()?,
            ["policy", "origin"] => {
                self.policy.origin = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["audit", "enabled"] => self.audit.enabled = value.parse()?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# sudokey configuration
# Auto-created on first run. Edit as needed.

[stack]
# PAM stack that receives the pam_u2f line
path = "/etc/pam.d/sudo"

[mapping]
# Credential mapping store (one "user:credential" line per user)
path = "/etc/u2f_mappings"

[policy]
# passwordless: a key touch alone authorizes sudo, password is the fallback
# two-factor:   key touch AND password are both required
mode = "passwordless"

# Print "Please touch the device." while waiting for the key
cue = true

# Origin the credentials are bound to (default: pam://<fqdn or hostname>)
# origin = "pam://myhost.example.org"

[logging]
level = "info"

[audit]
# Hash-chained record of every change in the state directory
enabled = true
"#;
