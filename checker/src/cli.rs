//! Command-line interface for the checker binary.
//!
//! Kept in the library so that argument handling can be unit tested without
//! spawning the binary.

use camino::Utf8PathBuf;
use clap::Parser;
use std::time::Duration;

/// Verify checksums and detached signatures of published release artefacts.
#[derive(Parser, Debug, Clone)]
#[command(name = "dist-integrity-checker")]
#[command(version, about)]
#[command(long_about = concat!(
    "Verify checksums and detached signatures of published release artefacts.\n\n",
    "Every artefact under the configured distribution tree is checked against its ",
    "SHA-512/SHA-256 checksum file and its detached OpenPGP signature, using the ",
    "project's KEYS file. Projects are notified once per new or changed problem.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Check every project once:\n",
    "    $ dist-integrity-checker --config /etc/dist-integrity/checker.toml\n\n",
    "  Check two projects without sending mail:\n",
    "    $ dist-integrity-checker --debug httpd tomcat\n\n",
    "  Keep checking every 30 minutes until interrupted:\n",
    "    $ dist-integrity-checker --forever --interval-secs 1800",
))]
pub struct Cli {
    /// Projects to check [default: all].
    #[arg(value_name = "PROJECT")]
    pub projects: Vec<String>,

    /// Configuration file [default: ./checker.toml when present].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Log notifications instead of sending them.
    #[arg(long)]
    pub debug: bool,

    /// Repeat passes until interrupted.
    #[arg(long)]
    pub forever: bool,

    /// Seconds to wait between passes with --forever.
    #[arg(long, value_name = "SECS", default_value_t = 1800)]
    pub interval_secs: u64,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Increase log detail (repeat for trace output).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Default log filter implied by the verbosity flags. `RUST_LOG` wins
    /// when set.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }

    /// Pause between passes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
