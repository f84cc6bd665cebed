//! Verification engine for published distribution artefacts.
//!
//! For every release artefact the engine checks the companion checksum
//! manifests and detached OpenPGP signatures, remembers the outcome per
//! artefact version, and reports new or changed failures to the owning
//! project exactly once (until a cooldown elapses).
//!
//! The main pieces are:
//!
//! - [`digest`]: single-pass streaming digests over several algorithms.
//! - [`manifest`]: tolerant parsing of checksum files.
//! - [`signature`] and [`openpgp`]: detached-signature verdicts against a
//!   project's trusted keys.
//! - [`keyring`]: per-project key rings with cached, single-flight refresh.
//! - [`store`]: persistent per-artefact records.
//! - [`orchestrator`]: the per-artefact state machine.
//! - [`notify`]: deduplicated, addressed notifications.
//! - [`run`]: a bounded, cancellable pass over an artefact set.
//! - [`slot`]: concurrency permits shared with blocking work.
//!
//! # Example
//!
//! ```no_run
//! use dist_integrity_checker::app::{Checker, StartupOptions};
//! use dist_integrity_checker::config::CheckerConfig;
//! use dist_integrity_checker::run::RunControl;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CheckerConfig::from_toml("dist_dir = \"/srv/dist\"")?;
//! let checker = Checker::build(&config, &StartupOptions::default())?;
//! let summary = checker.pass(&RunControl::new()).await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod keyring;
pub mod manifest;
pub mod notify;
pub mod openpgp;
pub mod orchestrator;
pub mod run;
pub mod signature;
pub mod slot;
pub mod source;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::RunError;
pub use run::{RunControl, RunSummary, VerificationRun};
