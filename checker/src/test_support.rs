//! Deterministic collaborators for exercising the engine without real keys,
//! networks, or mail servers.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! behaviour suites under `tests/`.

use crate::error::RunError;
use crate::keyring::{KeyRing, KeyRingEntry, KeyRingResolver, KeySource, KeySourceError};
use crate::notify::{
    MessageComposer, Notification, NotificationDispatcher, NotificationPolicy,
    NotificationTransport, RecipientResolver, TransportError,
};
use crate::orchestrator::{Orchestrator, VerificationPolicy};
use crate::run::{RunControl, RunSummary, VerificationRun};
use crate::signature::{CryptoCheck, SignatureBackend, SignatureError, SignatureInfo, SignatureVerifier};
use crate::source::{ArtefactSource, Discovery, DistTreeSource};
use crate::store::{ArtefactRecord, MemoryRecordStore, RecordStore};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use dist_integrity_common::{ArtefactKey, DigestAlgorithm, Namespace};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const SIGNED_BY: &str = "signed-by:";
const COVERS: &str = "covers:";

/// A signature scheme where the "signature" names its key and the SHA-256 of
/// the bytes it covers.
///
/// ```text
/// signed-by:<FINGERPRINT>
/// covers:<sha256 hex>
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct StubSignatureBackend;

impl StubSignatureBackend {
    /// Produce a blob for `fingerprint` covering `content`.
    #[must_use]
    pub fn sign(fingerprint: &str, content: &[u8]) -> String {
        let digest = Sha256::digest(content);
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{SIGNED_BY}{fingerprint}\n{COVERS}{hex}\n")
    }

    fn field<'a>(blob: &'a str, prefix: &str) -> Option<&'a str> {
        blob.lines()
            .find_map(|line| line.strip_prefix(prefix))
            .map(str::trim)
    }
}

impl SignatureBackend for StubSignatureBackend {
    fn inspect(&self, blob: &[u8]) -> Result<SignatureInfo, SignatureError> {
        let text = String::from_utf8_lossy(blob);
        let issuer = Self::field(&text, SIGNED_BY).ok_or_else(|| SignatureError::Malformed {
            detail: "no signed-by line".to_owned(),
        })?;
        Ok(SignatureInfo {
            issuers: vec![issuer.to_ascii_uppercase()],
            created: None,
        })
    }

    fn check(
        &self,
        artefact: &Utf8Path,
        blob: &[u8],
        _ring: &KeyRing,
    ) -> Result<CryptoCheck, SignatureError> {
        let text = String::from_utf8_lossy(blob);
        let Some(covers) = Self::field(&text, COVERS) else {
            return Ok(CryptoCheck::Malformed("no covers line".to_owned()));
        };
        let bytes = std::fs::read(artefact).map_err(|source| SignatureError::Read {
            path: artefact.to_owned(),
            source,
        })?;
        let digest = Sha256::digest(&bytes);
        let actual: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok(if actual == covers {
            CryptoCheck::Good
        } else {
            CryptoCheck::Bad("digest of signed data differs".to_owned())
        })
    }
}

/// Build a ring trusting the given fingerprints with no validity limits.
#[must_use]
pub fn trusted_ring(fingerprints: &[&str]) -> KeyRing {
    let entries = fingerprints
        .iter()
        .map(|fpr| {
            let key_id = fpr.get(fpr.len().saturating_sub(16)..).unwrap_or(fpr);
            KeyRingEntry::new(key_id, *fpr)
        })
        .collect();
    KeyRing::new(entries, Vec::new())
}

/// A [`KeySource`] serving rings from memory, with switchable failure and an
/// optional per-fetch delay.
#[derive(Debug, Default)]
pub struct StaticKeySource {
    rings: Mutex<HashMap<Namespace, KeyRing>>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    fetches: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl StaticKeySource {
    /// Create a source with no rings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `ring` for `namespace`, replacing any earlier one.
    pub fn set_ring(&self, namespace: &Namespace, ring: KeyRing) {
        self.rings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.clone(), ring);
    }

    /// Make every later fetch fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep this long inside every fetch.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of fetches served or failed so far.
    #[must_use]
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Most fetches that were ever running at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn serve(&self, namespace: &Namespace) -> Result<KeyRing, KeySourceError> {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(KeySourceError::Unavailable {
                namespace: namespace.to_string(),
                reason: "key server unreachable".to_owned(),
            });
        }
        Ok(self
            .rings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

impl KeySource for StaticKeySource {
    fn fetch(&self, namespace: &Namespace) -> Result<KeyRing, KeySourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let served = self.serve(namespace);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        served
    }
}

/// A throwaway distribution tree on disk.
#[derive(Debug)]
pub struct DistFixture {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl DistFixture {
    /// Create an empty tree in a fresh temporary directory.
    ///
    /// # Panics
    ///
    /// Panics when the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temporary dist tree");
        let root = Utf8PathBuf::from_path_buf(dir.path().join("dist"))
            .expect("temporary directory path is UTF-8");
        std::fs::create_dir_all(&root).expect("create dist root");
        Self { _dir: dir, root }
    }

    /// Root of the tree.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// A path outside the tree for state files.
    #[must_use]
    pub fn state_path(&self) -> Utf8PathBuf {
        self.root.with_file_name("state").join("records.jsonl")
    }

    /// Write `content` at `<root>/<relative>`, creating parents.
    ///
    /// # Panics
    ///
    /// Panics on I/O failure.
    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> Utf8PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent directories");
        }
        std::fs::write(&path, content).expect("write fixture file");
        path
    }

    /// Write a correct `<relative>.<alg>` manifest for the artefact at
    /// `relative`.
    ///
    /// # Panics
    ///
    /// Panics when the artefact cannot be read or the manifest written.
    pub fn correct_manifest(&self, relative: &str, algorithm: DigestAlgorithm) -> Utf8PathBuf {
        let artefact = self.root.join(relative);
        let digests =
            crate::digest::digest_file(&artefact, &[algorithm]).expect("digest fixture artefact");
        let name = artefact.file_name().unwrap_or_default().to_owned();
        let line = format!("{}  {name}\n", digests[&algorithm]);
        self.write(&format!("{relative}.{}", algorithm.extension()), line)
    }

    /// Remove `<root>/<relative>`.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be removed.
    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.root.join(relative)).expect("remove fixture file");
    }
}

impl Default for DistFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A transport that keeps every accepted message and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
    attempts: AtomicU64,
}

impl RecordingTransport {
    /// Create a transport that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later message (or accept again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keys reported across every accepted message.
    #[must_use]
    pub fn reported_keys(&self) -> Vec<ArtefactKey> {
        self.sent()
            .into_iter()
            .flat_map(|message| message.artefacts)
            .collect()
    }

    /// Send attempts, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationTransport for RecordingTransport {
    fn send(&self, message: &Notification) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                program: "recording".into(),
                status: "exit status: 75".to_owned(),
                stderr: "mail server unavailable".to_owned(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

/// Settings for a [`TestBench`].
#[derive(Debug, Clone)]
pub struct BenchOptions {
    /// Verification policy for the orchestrator.
    pub policy: VerificationPolicy,
    /// Re-notify cooldown.
    pub renotify_cooldown: Duration,
    /// Key ring refresh interval.
    pub key_refresh: Duration,
    /// Concurrent evaluations.
    pub concurrency: usize,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            policy: VerificationPolicy::default(),
            renotify_cooldown: NotificationPolicy::default().renotify_cooldown,
            key_refresh: Duration::from_secs(3600),
            concurrency: 4,
        }
    }
}

/// A fully wired engine over a [`DistFixture`], with in-memory keys, a
/// recording transport and the stub signature scheme.
pub struct TestBench {
    /// The distribution tree.
    pub tree: Arc<DistFixture>,
    /// Key material served to the resolver.
    pub keys: Arc<StaticKeySource>,
    /// Messages the dispatcher sent.
    pub transport: Arc<RecordingTransport>,
    /// Record store behind the engine.
    pub store: Arc<dyn RecordStore>,
    /// Cancellation flag handed to every pass.
    pub control: RunControl,
    run: VerificationRun,
}

impl std::fmt::Debug for TestBench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestBench")
            .field("tree", &self.tree)
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

impl TestBench {
    /// A bench with default options and an in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(BenchOptions::default())
    }

    /// A bench with `options` and an in-memory store.
    #[must_use]
    pub fn with_options(options: BenchOptions) -> Self {
        Self::assemble(
            Arc::new(DistFixture::new()),
            Arc::new(StaticKeySource::new()),
            Arc::new(MemoryRecordStore::new()),
            options,
        )
    }

    /// Wire an engine around existing collaborators, for example to restart
    /// over the same tree with a reopened store.
    #[must_use]
    pub fn assemble(
        tree: Arc<DistFixture>,
        keys: Arc<StaticKeySource>,
        store: Arc<dyn RecordStore>,
        options: BenchOptions,
    ) -> Self {
        let transport = Arc::new(RecordingTransport::new());
        let resolver = Arc::new(KeyRingResolver::new(
            Arc::clone(&keys) as Arc<dyn KeySource>,
            options.key_refresh,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            resolver,
            SignatureVerifier::new(Arc::new(StubSignatureBackend)),
            options.policy,
        ));
        let dispatcher = NotificationDispatcher::new(
            NotificationPolicy {
                renotify_cooldown: options.renotify_cooldown,
            },
            Arc::clone(&transport) as Arc<dyn NotificationTransport>,
            RecipientResolver::new("example.org"),
            MessageComposer::new("checker@example.org", "downloads.example.org"),
        );
        let run = VerificationRun::new(
            orchestrator,
            dispatcher,
            Arc::clone(&store),
            options.concurrency,
        );
        Self {
            tree,
            keys,
            transport,
            store,
            control: RunControl::new(),
            run,
        }
    }

    /// Run one pass over the whole tree as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the pass is aborted.
    pub async fn pass_at(&self, now: DateTime<Utc>) -> Result<RunSummary, RunError> {
        let source = DistTreeSource::new(
            self.tree.root(),
            ["gz".to_owned(), "zip".to_owned()],
            DigestAlgorithm::ALL.to_vec(),
        );
        let discovery = source.discover()?;
        self.run_discovery(discovery, now).await
    }

    /// Run one pass over a hand-built `discovery` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the pass is aborted.
    pub async fn run_discovery(
        &self,
        discovery: Discovery,
        now: DateTime<Utc>,
    ) -> Result<RunSummary, RunError> {
        self.run.run_at(discovery, &self.control, now).await
    }

    /// The stored record for `<namespace>/<path>`.
    ///
    /// # Panics
    ///
    /// Panics when the key is invalid or the store cannot be read.
    #[must_use]
    pub fn record(&self, namespace: &str, path: &str) -> Option<ArtefactRecord> {
        let key = ArtefactKey::new(
            Namespace::try_from(namespace).expect("valid namespace"),
            path,
        )
        .expect("valid key");
        self.store.get(&key).expect("readable store")
    }

    /// Publish `content` at `relative` with a correct SHA-512 manifest and a
    /// signature by `fingerprint`.
    pub fn publish_signed(&self, relative: &str, content: &[u8], fingerprint: &str) {
        self.tree.write(relative, content);
        self.tree.correct_manifest(relative, DigestAlgorithm::Sha512);
        self.tree.write(
            &format!("{relative}.asc"),
            StubSignatureBackend::sign(fingerprint, content),
        );
    }
}

impl Default for TestBench {
    fn default() -> Self {
        Self::new()
    }
}
