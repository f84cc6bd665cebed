//! Artefact discovery.
//!
//! An [`ArtefactSource`] lists, for one run, every artefact together with the
//! companion manifests and signatures found next to it. [`DistTreeSource`]
//! walks a distribution tree laid out as `<root>/<project>/...`.

use camino::{Utf8DirEntry, Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use dist_integrity_common::{Artefact, ArtefactKey, ArtefactVersion, DigestAlgorithm, Namespace};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::io::ErrorKind;

/// Signature file extensions looked for next to each artefact.
pub const SIGNATURE_EXTENSIONS: [&str; 2] = ["asc", "sig"];

/// A companion checksum file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    /// Algorithm implied by the file extension.
    pub algorithm: DigestAlgorithm,
    /// Location of the manifest.
    pub path: Utf8PathBuf,
}

/// One artefact offered for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredArtefact {
    /// Identity and observed version.
    pub artefact: Artefact,
    /// Where the artefact bytes can be read.
    pub location: Utf8PathBuf,
    /// Companion manifests, zero or one per algorithm.
    pub manifests: Vec<ManifestRef>,
    /// Companion detached signatures.
    pub signatures: Vec<Utf8PathBuf>,
}

/// The artefacts offered for one run.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Artefacts to evaluate.
    pub artefacts: Vec<DiscoveredArtefact>,
    /// Namespaces that were listed completely. Records in these namespaces
    /// that were not offered are marked stale after an uncancelled run.
    pub complete_namespaces: Vec<Namespace>,
}

/// Errors that prevent discovery altogether.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The tree root could not be listed.
    #[error("failed to list {path}: {source}")]
    List {
        /// Directory that could not be listed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Supplies the artefact set for a run.
pub trait ArtefactSource: Send + Sync {
    /// Enumerate the artefacts to verify.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when nothing can be listed. Problems confined
    /// to one namespace are logged and that namespace is left incomplete.
    fn discover(&self) -> Result<Discovery, SourceError>;
}

/// Walks `<root>/<project>/**` for artefacts with known extensions.
#[derive(Debug, Clone)]
pub struct DistTreeSource {
    root: Utf8PathBuf,
    extensions: BTreeSet<String>,
    algorithms: Vec<DigestAlgorithm>,
    projects: Option<BTreeSet<String>>,
}

impl DistTreeSource {
    /// Create a source over `root` selecting files whose name ends in one of
    /// `extensions` (multi-part ones such as `tar.gz` included) and
    /// attaching manifests for `algorithms`.
    #[must_use]
    pub fn new(
        root: impl Into<Utf8PathBuf>,
        extensions: impl IntoIterator<Item = String>,
        algorithms: Vec<DigestAlgorithm>,
    ) -> Self {
        Self {
            root: root.into(),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_owned())
                .collect(),
            algorithms,
            projects: None,
        }
    }

    /// Restrict discovery to the named projects.
    #[must_use]
    pub fn with_projects(mut self, projects: impl IntoIterator<Item = String>) -> Self {
        let wanted: BTreeSet<String> = projects.into_iter().collect();
        self.projects = (!wanted.is_empty()).then_some(wanted);
        self
    }

    fn wanted(&self, project: &str) -> bool {
        self.projects
            .as_ref()
            .is_none_or(|projects| projects.contains(project))
    }

    fn is_artefact(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| {
            name.strip_suffix(ext.as_str())
                .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
        })
    }

    fn walk(
        &self,
        namespace: &Namespace,
        ns_root: &Utf8Path,
        dir: &Utf8Path,
        listing: &mut Listing,
    ) {
        let listed = match list_sorted(dir) {
            Ok(listed) => listed,
            Err(err) => {
                warn!("failed to list {dir}: {err}");
                listing.complete = false;
                return;
            }
        };
        if listed.unreadable > 0 {
            listing.complete = false;
        }
        for entry in listed.entries {
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    warn!("skipping {path}: {err}");
                    listing.complete = false;
                    continue;
                }
            };
            if file_type.is_dir() {
                self.walk(namespace, ns_root, path, listing);
                continue;
            }
            if !file_type.is_file() || !self.is_artefact(entry.file_name()) {
                continue;
            }
            match self.describe(namespace, ns_root, path) {
                Ok(discovered) => listing.found.push(discovered),
                Err(err) => warn!("skipping {path}: {err}"),
            }
        }
    }

    fn describe(
        &self,
        namespace: &Namespace,
        ns_root: &Utf8Path,
        path: &Utf8Path,
    ) -> Result<DiscoveredArtefact, String> {
        let relative = path
            .strip_prefix(ns_root)
            .map_err(|err| err.to_string())?;
        let key = ArtefactKey::new(namespace.clone(), relative).map_err(|err| err.to_string())?;
        let metadata = path.metadata().map_err(|err| err.to_string())?;
        let modified = metadata.modified().map_err(|err| err.to_string())?;
        let version = ArtefactVersion {
            size: metadata.len(),
            modified: DateTime::<Utc>::from(modified),
        };
        let manifests = self
            .algorithms
            .iter()
            .map(|alg| ManifestRef {
                algorithm: *alg,
                path: sibling(path, alg.extension()),
            })
            .filter(|manifest| manifest.path.is_file())
            .collect();
        let signatures = SIGNATURE_EXTENSIONS
            .iter()
            .map(|ext| sibling(path, ext))
            .filter(|sig| sig.is_file())
            .collect();
        Ok(DiscoveredArtefact {
            artefact: Artefact { key, version },
            location: path.to_owned(),
            manifests,
            signatures,
        })
    }
}

/// Artefacts found under one namespace, and whether every directory in it
/// could be listed.
struct Listing {
    found: Vec<DiscoveredArtefact>,
    complete: bool,
}

/// Entries of one directory, sorted by name.
struct Listed {
    entries: Vec<Utf8DirEntry>,
    /// Entries that failed for a reason other than a non-UTF-8 name.
    unreadable: usize,
}

/// List `dir`, skipping entries that cannot be read.
///
/// Names that are not UTF-8 cannot become artefact keys, so those entries
/// are dropped with a warning without counting as unreadable.
fn list_sorted(dir: &Utf8Path) -> std::io::Result<Listed> {
    let mut listed = Listed {
        entries: Vec::new(),
        unreadable: 0,
    };
    for entry in dir.read_dir_utf8()? {
        match entry {
            Ok(entry) => listed.entries.push(entry),
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                warn!("skipping an entry of {dir} whose name is not UTF-8");
            }
            Err(err) => {
                warn!("skipping an unreadable entry of {dir}: {err}");
                listed.unreadable += 1;
            }
        }
    }
    listed.entries.sort_by(|a, b| a.file_name().cmp(b.file_name()));
    Ok(listed)
}

fn sibling(path: &Utf8Path, extension: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.{extension}"))
}

impl ArtefactSource for DistTreeSource {
    fn discover(&self) -> Result<Discovery, SourceError> {
        let projects = list_sorted(&self.root).map_err(|source| SourceError::List {
            path: self.root.clone(),
            source,
        })?;

        let mut discovery = Discovery::default();
        for project in projects.entries {
            let name = project.file_name();
            if !self.wanted(name) || !project.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let namespace = match Namespace::try_from(name) {
                Ok(namespace) => namespace,
                Err(err) => {
                    warn!("skipping directory {}: {err}", project.path());
                    continue;
                }
            };
            let mut listing = Listing {
                found: Vec::new(),
                complete: true,
            };
            self.walk(&namespace, project.path(), project.path(), &mut listing);
            debug!("{namespace}: {} artefact(s) discovered", listing.found.len());
            if listing.complete {
                discovery.complete_namespaces.push(namespace);
            } else {
                warn!("listing of {namespace} incomplete, its records will not be marked stale");
            }
            discovery.artefacts.extend(listing.found);
        }
        Ok(discovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    struct Tree {
        _tmp: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    impl Tree {
        fn file(&self, relative: &str, contents: &str) {
            let path = self.root.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir");
            }
            std::fs::write(path, contents).expect("write");
        }
    }

    #[fixture]
    fn tree() -> Tree {
        let tmp = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8 path");
        let tree = Tree { _tmp: tmp, root };
        tree.file("foo/1.0/foo-1.0.tar.gz", "bytes");
        tree.file("foo/1.0/foo-1.0.tar.gz.sha512", "digest");
        tree.file("foo/1.0/foo-1.0.tar.gz.asc", "sig");
        tree.file("foo/1.0/README.txt", "readme");
        tree.file("foo/KEYS", "keys");
        tree.file("bar/bar-2.0.zip", "bytes");
        tree
    }

    fn source(tree: &Tree) -> DistTreeSource {
        DistTreeSource::new(
            tree.root.clone(),
            ["gz".to_owned(), ".zip".to_owned()],
            DigestAlgorithm::ALL.to_vec(),
        )
    }

    #[rstest]
    fn finds_artefacts_and_their_companions(tree: Tree) {
        let discovery = source(&tree).discover().expect("discover");
        assert_eq!(discovery.artefacts.len(), 2);
        let foo = discovery
            .artefacts
            .iter()
            .find(|d| d.artefact.key.namespace().as_str() == "foo")
            .expect("foo artefact");
        assert_eq!(foo.artefact.key.path().as_str(), "1.0/foo-1.0.tar.gz");
        assert_eq!(foo.artefact.version.size, 5);
        assert_eq!(foo.manifests.len(), 1);
        assert_eq!(foo.manifests[0].algorithm, DigestAlgorithm::Sha512);
        assert_eq!(foo.signatures.len(), 1);
        assert_eq!(discovery.complete_namespaces.len(), 2);
    }

    #[rstest]
    fn artefact_without_companions_is_still_offered(tree: Tree) {
        let discovery = source(&tree).discover().expect("discover");
        let bar = discovery
            .artefacts
            .iter()
            .find(|d| d.artefact.key.namespace().as_str() == "bar")
            .expect("bar artefact");
        assert!(bar.manifests.is_empty());
        assert!(bar.signatures.is_empty());
    }

    #[rstest]
    fn project_filter_limits_namespaces(tree: Tree) {
        let discovery = source(&tree)
            .with_projects(["bar".to_owned()])
            .discover()
            .expect("discover");
        assert_eq!(discovery.artefacts.len(), 1);
        assert_eq!(discovery.complete_namespaces.len(), 1);
    }

    #[rstest]
    #[case("foo-1.0.tar.gz", true)]
    #[case("foo-1.0.tar.gz.asc", false)]
    #[case("foo-1.0.tar.gz.sha512", false)]
    #[case("tar.gz", false)]
    #[case("foo.gz", false)]
    fn multi_part_extensions_match_whole_suffixes(#[case] name: &str, #[case] wanted: bool) {
        let source = DistTreeSource::new("/dist", ["tar.gz".to_owned()], Vec::new());
        assert_eq!(source.is_artefact(name), wanted);
    }

    #[cfg(unix)]
    fn odd_name(parent: &Utf8Path, raw: &[u8]) -> std::path::PathBuf {
        use std::os::unix::ffi::OsStrExt;
        parent.as_std_path().join(std::ffi::OsStr::from_bytes(raw))
    }

    #[cfg(unix)]
    #[rstest]
    fn non_utf8_project_directory_is_skipped(tree: Tree) {
        std::fs::create_dir(odd_name(&tree.root, b"bad\xff")).expect("mkdir");
        let discovery = source(&tree).discover().expect("discover");
        assert_eq!(discovery.artefacts.len(), 2);
        assert_eq!(discovery.complete_namespaces.len(), 2);
    }

    #[cfg(unix)]
    #[rstest]
    fn non_utf8_file_leaves_its_project_complete(tree: Tree) {
        std::fs::write(odd_name(&tree.root.join("foo"), b"\xffnotes"), "notes").expect("write");
        let discovery = source(&tree).discover().expect("discover");
        assert_eq!(discovery.artefacts.len(), 2);
        assert!(
            discovery
                .complete_namespaces
                .iter()
                .any(|ns| ns.as_str() == "foo")
        );
    }

    #[cfg(unix)]
    #[rstest]
    fn unlistable_subdirectory_leaves_its_project_incomplete(tree: Tree) {
        use std::os::unix::fs::PermissionsExt;
        tree.file("foo/2.0/foo-2.0.tar.gz", "bytes");
        let locked = tree.root.join("foo/2.0");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000))
            .expect("chmod");
        if locked.read_dir_utf8().is_ok() {
            // Running with privileges that ignore directory permissions.
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
            return;
        }

        let result = source(&tree).discover();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        let discovery = result.expect("discover");
        assert_eq!(discovery.artefacts.len(), 2);
        let complete: Vec<_> = discovery
            .complete_namespaces
            .iter()
            .map(Namespace::as_str)
            .collect();
        assert_eq!(complete, ["bar"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let source = DistTreeSource::new("/nonexistent/dist", Vec::new(), Vec::new());
        assert!(matches!(
            source.discover(),
            Err(SourceError::List { .. })
        ));
    }
}
