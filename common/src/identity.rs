//! Artefact identity: project namespace, stable key, and observed version.
//!
//! An artefact is keyed by its namespace and its path relative to the
//! namespace root. The version (size and modification time) distinguishes
//! successive uploads at the same path; a changed version is treated as a
//! logically new artefact.

use crate::error::{Result, ValidationError};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated project namespace (one top-level directory of the dist tree).
///
/// # Examples
///
/// ```
/// use dist_integrity_common::identity::Namespace;
///
/// let ns = Namespace::try_from("httpd").unwrap();
/// assert_eq!(ns.as_str(), "httpd");
/// assert!(Namespace::try_from("../etc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Return the namespace as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Namespace {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self> {
        validate_namespace(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Namespace {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self> {
        validate_namespace(&value)?;
        Ok(Self(value))
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_namespace(value: &str) -> Result<()> {
    let reject = |reason: &str| ValidationError::InvalidNamespace {
        value: value.to_owned(),
        reason: reason.to_owned(),
    };
    if value.is_empty() {
        return Err(reject("namespace must not be empty"));
    }
    if value.starts_with('.') {
        return Err(reject("namespace must not start with '.'"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(reject(&format!("unexpected character '{bad}'")));
    }
    Ok(())
}

/// Stable identity of an artefact across versions: namespace plus the path
/// relative to the namespace root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtefactKey {
    namespace: Namespace,
    path: Utf8PathBuf,
}

impl ArtefactKey {
    /// Build a key, rejecting absolute paths and parent-directory segments.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidArtefactPath`] when `path` is empty,
    /// absolute, or contains `..`.
    ///
    /// # Examples
    ///
    /// ```
    /// use dist_integrity_common::identity::{ArtefactKey, Namespace};
    ///
    /// let ns = Namespace::try_from("foo").unwrap();
    /// let key = ArtefactKey::new(ns, "1.0/foo-1.0.tar.gz").unwrap();
    /// assert_eq!(key.to_string(), "foo/1.0/foo-1.0.tar.gz");
    /// ```
    pub fn new(namespace: Namespace, path: impl Into<Utf8PathBuf>) -> Result<Self> {
        let path = path.into();
        validate_relative_path(&path)?;
        Ok(Self { namespace, path })
    }

    /// Return the owning namespace.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Return the path relative to the namespace root.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Return the final path component, used in human-readable reports.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }
}

impl fmt::Display for ArtefactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.path)
    }
}

fn validate_relative_path(path: &Utf8Path) -> Result<()> {
    let reject = |reason: &str| ValidationError::InvalidArtefactPath {
        value: path.to_string(),
        reason: reason.to_owned(),
    };
    if path.as_str().is_empty() {
        return Err(reject("path must not be empty"));
    }
    for component in path.components() {
        match component {
            Utf8Component::Normal(_) | Utf8Component::CurDir => {}
            Utf8Component::ParentDir => return Err(reject("path must not contain '..'")),
            Utf8Component::RootDir | Utf8Component::Prefix(_) => {
                return Err(reject("path must be relative to the namespace root"));
            }
        }
    }
    Ok(())
}

/// Observed version of an artefact: byte size and last modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtefactVersion {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

impl fmt::Display for ArtefactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes, modified {}", self.size, self.modified.to_rfc3339())
    }
}

/// A distribution file observed at a given version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artefact {
    /// Stable identity.
    pub key: ArtefactKey,
    /// Version observed during discovery.
    pub version: ArtefactVersion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ns(value: &str) -> Namespace {
        Namespace::try_from(value).expect("valid namespace")
    }

    #[rstest]
    #[case("httpd")]
    #[case("commons-lang")]
    #[case("incubator_foo.bar")]
    fn accepts_plain_namespaces(#[case] value: &str) {
        assert!(Namespace::try_from(value).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case(".hidden")]
    #[case("a/b")]
    #[case("spaced name")]
    fn rejects_invalid_namespaces(#[case] value: &str) {
        let err = Namespace::try_from(value).expect_err("namespace should be rejected");
        assert!(matches!(err, ValidationError::InvalidNamespace { .. }));
    }

    #[rstest]
    #[case("../escape.tar.gz")]
    #[case("/etc/passwd")]
    #[case("")]
    fn rejects_unsafe_artefact_paths(#[case] path: &str) {
        let err = ArtefactKey::new(ns("foo"), path).expect_err("path should be rejected");
        assert!(matches!(err, ValidationError::InvalidArtefactPath { .. }));
    }

    #[test]
    fn key_displays_namespace_and_path() {
        let key = ArtefactKey::new(ns("foo"), "1.0/foo-1.0.tar.gz").expect("valid key");
        assert_eq!(key.to_string(), "foo/1.0/foo-1.0.tar.gz");
        assert_eq!(key.file_name(), "foo-1.0.tar.gz");
    }

    #[test]
    fn namespace_deserialisation_validates() {
        let parsed: std::result::Result<Namespace, _> = serde_json::from_str("\"../x\"");
        assert!(parsed.is_err());
    }
}
