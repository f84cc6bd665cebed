//! Integrity and signature verification for published distribution
//! artefacts.
//!
//! The workspace is split into two crates:
//!
//! - [`common`] holds the vocabulary shared by every component: artefact
//!   identity, digest algorithms and values, and verification outcomes.
//! - [`checker`] holds the engine, its configuration and the
//!   `dist-integrity-checker` binary.
//!
//! This crate re-exports both so that downstream tools can depend on a
//! single package.

pub use dist_integrity_checker as checker;
pub use dist_integrity_common as common;

pub use dist_integrity_checker::app::{Checker, StartupError, StartupOptions};
pub use dist_integrity_checker::config::{CheckerConfig, ConfigError};
pub use dist_integrity_checker::{RunControl, RunError, RunSummary, VerificationRun};
pub use dist_integrity_common::{
    ArtefactKey, DigestAlgorithm, DigestValue, Namespace, OutcomeKind, VerificationOutcome,
};
