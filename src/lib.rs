//! sudokey - configure security-key (pam_u2f) authentication for sudo
//!
//! This crate provides:
//! - Line synthesis from an immutable policy (`policy`)
//! - Snapshot, classification and atomic patching of the PAM stack (`stack`)
//! - The per-user credential mapping store (`mapping`)
//! - The enrollment sequence tying them together (`enroll`)
//! - Mutation lock, audit log, config and XDG paths

pub mod audit;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod enroll;
pub mod error;
pub mod fsutil;
pub mod mapping;
pub mod paths;
pub mod policy;
pub mod stack;
pub mod status;

pub use config::Config;
pub use error::{Error, Result};
