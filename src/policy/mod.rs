//! Authentication policy and the owned `pam_u2f` line it produces.
//!
//! A [`PolicyConfig`] is built once (from config file plus CLI overrides),
//! validated on construction, and then handed by reference to
//! [`synthesize`]. Synthesis is pure and total: every valid policy maps to
//! exactly one byte-exact line.

mod origin;

pub use origin::{HostSource, SystemHost, origin_for_host, origin_identifier};
#[cfg(test)]
pub use origin::MockHostSource;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Token identifying the line this tool owns inside a stack file.
pub const MODULE_TOKEN: &str = "pam_u2f.so";

/// Option that makes pam_u2f print a "touch the device" prompt.
pub const CUE_TOKEN: &str = "cue";

/// Separator placed between every field of the synthesized line.
pub const FIELD_SEPARATOR: &str = "  ";

/// Default location of the per-user credential mapping store.
pub const DEFAULT_MAPPING_STORE: &str = "/etc/u2f_mappings";

/// How a successful key touch combines with the rest of the sudo stack.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyMode {
    /// Key alone is enough; a failed touch falls through to the password.
    #[default]
    Passwordless,
    /// Key is mandatory and the password is still asked for.
    TwoFactor,
}

impl PolicyMode {
    /// PAM control token for this mode.
    pub fn control(self) -> &'static str {
        match self {
            PolicyMode::Passwordless => "sufficient",
            PolicyMode::TwoFactor => "required",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::Passwordless => f.write_str("passwordless"),
            PolicyMode::TwoFactor => f.write_str("two-factor"),
        }
    }
}

/// The desired authentication policy. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    mode: PolicyMode,
    prompt_cue: bool,
    mapping_store: PathBuf,
    origin: String,
}

impl PolicyConfig {
    /// Build a validated policy.
    ///
    /// The mapping store must be an absolute path and neither it nor the
    /// origin may contain whitespace, since either would split into extra
    /// fields on the PAM line.
    pub fn new(
        mode: PolicyMode,
        prompt_cue: bool,
        mapping_store: impl Into<PathBuf>,
        origin: impl Into<String>,
    ) -> Result<Self> {
        let mapping_store = mapping_store.into();
        let origin = origin.into();

        let store_str = mapping_store.to_str().ok_or_else(|| {
            Error::validation("mapping store path", "path is not valid UTF-8")
        })?;
        if !mapping_store.is_absolute() {
            return Err(Error::validation(
                "mapping store path",
                format!("'{store_str}' is not absolute"),
            ));
        }
        if store_str.chars().any(char::is_whitespace) {
            return Err(Error::validation(
                "mapping store path",
                format!("'{store_str}' contains whitespace"),
            ));
        }
        if origin.is_empty() {
            return Err(Error::validation("origin identifier", "empty"));
        }
        if origin.chars().any(char::is_whitespace) {
            return Err(Error::validation(
                "origin identifier",
                format!("'{origin}' contains whitespace"),
            ));
        }

        Ok(Self {
            mode,
            prompt_cue,
            mapping_store,
            origin,
        })
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn prompt_cue(&self) -> bool {
        self.prompt_cue
    }

    pub fn mapping_store(&self) -> &Path {
        &self.mapping_store
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// A synthesized `pam_u2f` line, without a trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedLine(String);

impl OwnedLine {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap arbitrary text, bypassing synthesis.
    #[cfg(test)]
    pub(crate) fn raw(line: impl Into<String>) -> Self {
        OwnedLine(line.into())
    }
}

impl fmt::Display for OwnedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OwnedLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Build the owned stack line for a policy.
///
/// Layout: `auth  <control>  pam_u2f.so  [cue]  authfile=<path>  origin=<id>`.
pub fn synthesize(policy: &PolicyConfig) -> OwnedLine {
    let mut fields = vec!["auth", policy.mode.control(), MODULE_TOKEN];
    if policy.prompt_cue {
        fields.push(CUE_TOKEN);
    }

    // Validated as UTF-8 in PolicyConfig::new
    let authfile = format!("authfile={}", policy.mapping_store.to_string_lossy());
    let origin = format!("origin={}", policy.origin);
    fields.push(&authfile);
    fields.push(&origin);

    OwnedLine(fields.join(FIELD_SEPARATOR))
}
