//! Host-scoped origin identifier (`pam://<host>`).
//!
//! pam_u2f binds every registered credential to an origin. Using the host
//! name keeps a record registered on one machine from being replayed on
//! another. The host name itself comes from a [`HostSource`].

use std::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Where host names come from.
#[cfg_attr(test, mockall::automock)]
pub trait HostSource {
    /// Fully-qualified domain name, if one is configured.
    fn fully_qualified(&self) -> Option<String>;

    /// Short (kernel) host name.
    fn short_name(&self) -> Option<String>;
}

/// Host names of the machine we are running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl HostSource for SystemHost {
    fn fully_qualified(&self) -> Option<String> {
        let output = Command::new("hostname").arg("-f").output().ok()?;
        if !output.status.success() {
            debug!("hostname -f exited with {}", output.status);
            return None;
        }
        non_empty(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn short_name(&self) -> Option<String> {
        #[cfg(unix)]
        {
            nix::unistd::gethostname()
                .ok()
                .and_then(|name| non_empty(name.to_string_lossy().into_owned()))
        }

        #[cfg(not(unix))]
        {
            std::env::var("COMPUTERNAME").ok().and_then(non_empty)
        }
    }
}

/// Build the origin string for an explicit host name.
pub fn origin_for_host(host: &str) -> String {
    format!("pam://{}", host)
}

/// Resolve the origin identifier, preferring the FQDN over the short name.
pub fn origin_identifier(source: &dyn HostSource) -> Result<String> {
    let host = source
        .fully_qualified()
        .and_then(non_empty)
        .or_else(|| source.short_name().and_then(non_empty))
        .ok_or_else(|| {
            Error::validation(
                "origin identifier",
                "no host name available; set policy.origin or pass --origin",
            )
        })?;

    Ok(origin_for_host(&host))
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_fully_qualified_name() {
        let mut host = MockHostSource::new();
        host.expect_fully_qualified()
            .returning(|| Some("host1.example.org\n".to_string()));
        host.expect_short_name().never();

        assert_eq!(
            origin_identifier(&host).unwrap(),
            "pam://host1.example.org"
        );
    }

    #[test]
    fn falls_back_to_short_name() {
        let mut host = MockHostSource::new();
        host.expect_fully_qualified().returning(|| None);
        host.expect_short_name()
            .times(1)
            .returning(|| Some("host1".to_string()));

        assert_eq!(origin_identifier(&host).unwrap(), "pam://host1");
    }

    #[test]
    fn blank_fqdn_counts_as_missing() {
        let mut host = MockHostSource::new();
        host.expect_fully_qualified()
            .returning(|| Some("   ".to_string()));
        host.expect_short_name()
            .returning(|| Some("host1".to_string()));

        assert_eq!(origin_identifier(&host).unwrap(), "pam://host1");
    }

    #[test]
    fn no_host_name_is_validation_error() {
        let mut host = MockHostSource::new();
        host.expect_fully_qualified().returning(|| None);
        host.expect_short_name().returning(|| None);

        let err = origin_identifier(&host).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn origin_format() {
        assert_eq!(origin_for_host("box"), "pam://box");
    }
}
