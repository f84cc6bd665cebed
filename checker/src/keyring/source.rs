//! Authoritative key sources.
//!
//! A [`KeySource`] is an opaque, blocking fetch: given a namespace it returns
//! the full trusted key set or fails. Caching and staleness live in the
//! resolver, never here.

use super::KeyRing;
use crate::openpgp::{ParsedKeys, parse_keys};
use camino::{Utf8Path, Utf8PathBuf};
use dist_integrity_common::Namespace;
use log::{debug, warn};
use std::sync::OnceLock;
use std::time::Duration;

/// Default network timeout for HTTP key fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors arising while fetching a key ring.
#[derive(Debug, thiserror::Error)]
pub enum KeySourceError {
    /// The source was reachable but has nothing for the namespace.
    #[error("no key material published for {namespace}")]
    NotFound {
        /// Namespace that was requested.
        namespace: String,
    },

    /// The source could not be reached or read.
    #[error("key source unavailable for {namespace}: {reason}")]
    Unavailable {
        /// Namespace that was requested.
        namespace: String,
        /// Human-readable cause.
        reason: String,
    },
}

/// Fetches the trusted key set for a namespace.
#[cfg_attr(test, mockall::automock)]
pub trait KeySource: Send + Sync {
    /// Fetch the authoritative ring for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`KeySourceError`] when the source cannot produce a ring.
    fn fetch(&self, namespace: &Namespace) -> Result<KeyRing, KeySourceError>;
}

fn ring_from_parsed(namespace: &Namespace, origin: &str, parsed: ParsedKeys) -> KeyRing {
    for reason in &parsed.rejected {
        warn!("skipping unreadable key block in {origin} for {namespace}: {reason}");
    }
    debug!(
        "loaded {} certificate(s) for {namespace} from {origin}",
        parsed.certs.len()
    );
    KeyRing::from_certs(parsed.certs)
}

/// Reads `KEYS` files published alongside a project's artefacts.
///
/// Every file named in `file_names` anywhere under `<root>/<namespace>/` is
/// read and their key blocks are merged.
#[derive(Debug, Clone)]
pub struct KeysFileSource {
    root: Utf8PathBuf,
    file_names: Vec<String>,
}

impl KeysFileSource {
    /// Create a source rooted at the distribution tree `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>, file_names: Vec<String>) -> Self {
        Self {
            root: root.into(),
            file_names,
        }
    }

    fn collect_key_files(&self, dir: &Utf8Path, found: &mut Vec<Utf8PathBuf>) -> std::io::Result<()> {
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.collect_key_files(entry.path(), found)?;
            } else if self.file_names.iter().any(|name| name == entry.file_name()) {
                found.push(entry.path().to_owned());
            }
        }
        Ok(())
    }
}

impl KeySource for KeysFileSource {
    fn fetch(&self, namespace: &Namespace) -> Result<KeyRing, KeySourceError> {
        let dir = self.root.join(namespace.as_str());
        let unavailable = |err: std::io::Error| KeySourceError::Unavailable {
            namespace: namespace.to_string(),
            reason: err.to_string(),
        };
        if !dir.is_dir() {
            return Err(KeySourceError::NotFound {
                namespace: namespace.to_string(),
            });
        }
        let mut files = Vec::new();
        self.collect_key_files(&dir, &mut files).map_err(unavailable)?;
        files.sort();
        let mut text = Vec::new();
        for file in &files {
            text.extend(std::fs::read(file).map_err(unavailable)?);
            text.push(b'\n');
        }
        if files.is_empty() {
            warn!("no KEYS file found for {namespace}; every signature will use an unknown key");
        }
        Ok(ring_from_parsed(namespace, dir.as_str(), parse_keys(&text)))
    }
}

/// Fetches a project's `KEYS` file over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    url_template: String,
}

impl HttpKeySource {
    /// Create a source from a URL template containing `{namespace}`.
    #[must_use]
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }

    /// Expand the template for `namespace`.
    ///
    /// # Examples
    ///
    /// ```
    /// use dist_integrity_checker::keyring::HttpKeySource;
    /// use dist_integrity_common::Namespace;
    ///
    /// let source = HttpKeySource::new("https://downloads.example.org/{namespace}/KEYS");
    /// let ns = Namespace::try_from("httpd").unwrap();
    /// assert_eq!(source.url_for(&ns), "https://downloads.example.org/httpd/KEYS");
    /// ```
    #[must_use]
    pub fn url_for(&self, namespace: &Namespace) -> String {
        self.url_template.replace("{namespace}", namespace.as_str())
    }
}

impl KeySource for HttpKeySource {
    fn fetch(&self, namespace: &Namespace) -> Result<KeyRing, KeySourceError> {
        let url = self.url_for(namespace);
        let response = http_agent()
            .get(&url)
            .call()
            .map_err(|err| map_ureq_error(namespace, &err))?;
        let text = response
            .into_body()
            .read_to_vec()
            .map_err(|err| KeySourceError::Unavailable {
                namespace: namespace.to_string(),
                reason: err.to_string(),
            })?;
        Ok(ring_from_parsed(namespace, &url, parse_keys(&text)))
    }
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(DEFAULT_FETCH_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

fn map_ureq_error(namespace: &Namespace, err: &ureq::Error) -> KeySourceError {
    match err {
        ureq::Error::StatusCode(404) => KeySourceError::NotFound {
            namespace: namespace.to_string(),
        },
        other => KeySourceError::Unavailable {
            namespace: namespace.to_string(),
            reason: other.to_string(),
        },
    }
}
