//! Checker configuration loaded from `checker.toml`.
//!
//! Every field has a default so an empty file is a valid configuration.
//! Unknown keys are rejected to catch typos early. Tables group the engine,
//! key ring and notification settings.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use dist_integrity_common::DigestAlgorithm;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// File name looked up when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "checker.toml";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// Configuration path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration TOML.
    #[error("invalid configuration {path}: {source}")]
    Parse {
        /// Configuration path.
        path: Utf8PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

/// Top-level configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CheckerConfig {
    /// Root of the artefact tree, one sub-directory per project.
    pub dist_dir: Utf8PathBuf,
    /// Record store journal. Defaults to the platform data directory.
    pub state_path: Option<Utf8PathBuf>,
    /// Site name used in notification subjects.
    pub site_name: String,
    /// Extensions of files treated as release artefacts.
    pub known_extensions: Vec<String>,
    /// Algorithms accepted as strong, most preferred first.
    pub strong_checksums: Vec<DigestAlgorithm>,
    /// Legacy algorithms accepted only when no strong manifest exists.
    pub weak_checksums: Vec<DigestAlgorithm>,
    /// Unix timestamp after which artefacts need a strong manifest.
    pub strong_checksum_deadline: Option<i64>,
    /// Engine settings.
    pub engine: EngineConfig,
    /// Key ring settings.
    pub keyring: KeyRingConfig,
    /// Notification settings.
    pub notify: NotifyConfig,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            dist_dir: Utf8PathBuf::from("/var/www/dist"),
            state_path: None,
            site_name: "dist.apache.org".to_owned(),
            known_extensions: [
                "tar.gz", "tgz", "tar.bz2", "tar.xz", "zip", "jar", "war", "msi", "exe", "dmg",
                "deb", "rpm", "nupkg", "whl", "gem",
            ]
            .iter()
            .map(|ext| (*ext).to_owned())
            .collect(),
            strong_checksums: vec![DigestAlgorithm::Sha512, DigestAlgorithm::Sha256],
            weak_checksums: vec![DigestAlgorithm::Sha1, DigestAlgorithm::Md5],
            strong_checksum_deadline: None,
            engine: EngineConfig::default(),
            keyring: KeyRingConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl CheckerConfig {
    /// Load and validate the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, malformed or
    /// inconsistent.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the text is malformed or inconsistent.
    ///
    /// # Examples
    ///
    /// ```
    /// use dist_integrity_checker::config::CheckerConfig;
    ///
    /// let config = CheckerConfig::from_toml("dist_dir = \"/srv/dist\"").unwrap();
    /// assert_eq!(config.dist_dir, "/srv/dist");
    /// assert_eq!(config.engine.concurrency, 8);
    /// ```
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: Utf8PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };
        if self.engine.concurrency == 0 {
            return invalid("engine.concurrency must be at least 1");
        }
        if self.engine.min_valid_signatures == 0 {
            return invalid("engine.min_valid_signatures must be at least 1");
        }
        if self.known_extensions.is_empty() {
            return invalid("known_extensions must not be empty");
        }
        if let Some(weak) = self.strong_checksums.iter().find(|alg| alg.is_weak()) {
            return Err(ConfigError::Invalid {
                reason: format!("{weak} cannot be listed as a strong checksum"),
            });
        }
        if self.keyring.source == KeySourceKind::Http && self.keyring.url_template.is_none() {
            return invalid("keyring.url_template is required for the http key source");
        }
        if self.strong_checksum_deadline.is_some() && self.deadline().is_none() {
            return invalid("strong_checksum_deadline is not a valid Unix timestamp");
        }
        Ok(())
    }

    /// Algorithms to look for, strong ones first.
    #[must_use]
    pub fn algorithms(&self) -> Vec<DigestAlgorithm> {
        let mut algorithms = self.strong_checksums.clone();
        for alg in &self.weak_checksums {
            if !algorithms.contains(alg) {
                algorithms.push(*alg);
            }
        }
        algorithms
    }

    /// The strong-checksum deadline as a timestamp.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.strong_checksum_deadline
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Journal path, falling back to the platform data directory and then
    /// to the working directory.
    #[must_use]
    pub fn resolved_state_path(&self) -> Utf8PathBuf {
        if let Some(path) = &self.state_path {
            return path.clone();
        }
        directories_next::ProjectDirs::from("org", "Apache", "dist-integrity")
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().to_path_buf()).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("."))
            .join("records.jsonl")
    }
}

/// `[engine]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Concurrent evaluations.
    pub concurrency: usize,
    /// Per-artefact time limit in seconds.
    pub artefact_timeout_secs: u64,
    /// Interval before an unresolved failure is reported again, in seconds.
    pub renotify_cooldown_secs: u64,
    /// Valid signatures required per artefact.
    pub min_valid_signatures: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            artefact_timeout_secs: 600,
            renotify_cooldown_secs: 7 * 24 * 60 * 60,
            min_valid_signatures: 1,
        }
    }
}

impl EngineConfig {
    /// Per-artefact time limit.
    #[must_use]
    pub const fn artefact_timeout(&self) -> Duration {
        Duration::from_secs(self.artefact_timeout_secs)
    }

    /// Re-notify cooldown.
    #[must_use]
    pub const fn renotify_cooldown(&self) -> Duration {
        Duration::from_secs(self.renotify_cooldown_secs)
    }
}

/// Where project keys come from.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum KeySourceKind {
    /// `KEYS` files inside the artefact tree.
    #[default]
    KeysFile,
    /// `KEYS` files fetched over HTTP.
    Http,
}

/// `[keyring]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct KeyRingConfig {
    /// Seconds a resolved ring is served before it is refreshed.
    pub refresh_interval_secs: u64,
    /// Key source.
    pub source: KeySourceKind,
    /// URL with a `{namespace}` placeholder, for the HTTP source.
    pub url_template: Option<String>,
    /// File names read by the KEYS-file source.
    pub keys_file_names: Vec<String>,
    /// Key ids or fingerprints treated as revoked in every project's ring,
    /// for revocations announced outside the KEYS files.
    pub revoked_keys: Vec<String>,
}

impl Default for KeyRingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 3600,
            source: KeySourceKind::KeysFile,
            url_template: None,
            keys_file_names: vec!["KEYS".to_owned(), "KEYS.txt".to_owned()],
            revoked_keys: Vec::new(),
        }
    }
}

impl KeyRingConfig {
    /// Refresh interval.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// How notifications leave the process.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// A local sendmail-compatible binary.
    #[default]
    Sendmail,
    /// Log the message instead of sending it.
    Log,
}

/// `[notify]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    /// `From` address.
    pub sender: String,
    /// Domain of the per-project lists.
    pub mail_domain: String,
    /// Addresses copied on every message.
    pub extra_recipients: Vec<String>,
    /// Namespace → list name overrides.
    pub mail_lists: BTreeMap<String, String>,
    /// Committee-info JSON fetched once per pass for list names.
    pub mail_map_url: Option<String>,
    /// Transport.
    pub transport: TransportKind,
    /// Mailer for the sendmail transport.
    pub sendmail_path: Utf8PathBuf,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sender: "Distribution Checker <root@apache.org>".to_owned(),
            mail_domain: "apache.org".to_owned(),
            extra_recipients: Vec::new(),
            mail_lists: BTreeMap::new(),
            mail_map_url: None,
            transport: TransportKind::Sendmail,
            sendmail_path: Utf8PathBuf::from("/usr/sbin/sendmail"),
        }
    }
}
