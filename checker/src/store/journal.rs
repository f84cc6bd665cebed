//! Append-only JSON-lines record store.
//!
//! Every `put` appends the full record as one line and syncs it, so a crash
//! loses at most the line being written. A write that fails is cut back to
//! the previous end of file; if even that fails the store refuses further
//! writes until it is reopened. On open the journal is replayed
//! (later lines win), a torn or corrupt line is skipped with a warning, and
//! the surviving records are rewritten atomically so the file does not grow
//! without bound. An exclusive lock file keeps a second checker process from
//! interleaving writes.

use super::{ArtefactRecord, RecordStore, StoreError};
use camino::{Utf8Path, Utf8PathBuf};
use dist_integrity_common::{ArtefactKey, Namespace};
use fs2::FileExt;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::sync::{Mutex, PoisonError};

/// What happened while opening the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenReport {
    /// Records loaded.
    pub records: usize,
    /// Lines dropped because they could not be decoded.
    pub skipped_lines: usize,
}

struct Inner {
    records: BTreeMap<ArtefactKey, ArtefactRecord>,
    journal: File,
    // Set when a failed append could not be cut back.
    torn: bool,
}

/// File-backed [`RecordStore`].
pub struct JournalStore {
    path: Utf8PathBuf,
    inner: Mutex<Inner>,
    // Held for the lifetime of the store; dropping it releases the lock.
    _lock: File,
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn io_error(path: &Utf8Path) -> impl Fn(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_owned(),
        source,
    }
}

impl JournalStore {
    /// Open (or create) the journal at `path`, replay it, and compact it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] when another process holds the store
    /// and [`StoreError::Io`] when the journal cannot be read or rewritten.
    pub fn open(location: impl Into<Utf8PathBuf>) -> Result<(Self, OpenReport), StoreError> {
        let path = location.into();
        let dir = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
            _ => Utf8PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let lock_path = Utf8PathBuf::from(format!("{path}.lock"));
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(io_error(&lock_path))?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked { path: lock_path })?;

        let (records, report) = replay(&path)?;
        compact(&path, &dir, &records)?;
        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))?;
        if report.skipped_lines > 0 {
            warn!(
                "record store {path}: dropped {} unreadable line(s) while loading",
                report.skipped_lines
            );
        }
        info!("record store {path}: {} record(s) loaded", report.records);

        Ok((
            Self {
                path,
                inner: Mutex::new(Inner {
                    records,
                    journal,
                    torn: false,
                }),
                _lock: lock,
            },
            report,
        ))
    }

    /// Return the journal path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn replay(path: &Utf8Path) -> Result<(BTreeMap<ArtefactKey, ArtefactRecord>, OpenReport), StoreError> {
    let mut records = BTreeMap::new();
    let mut report = OpenReport::default();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok((records, report)),
        Err(err) => return Err(io_error(path)(err)),
    };
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_error(path))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ArtefactRecord>(&line) {
            Ok(record) => {
                records.insert(record.key.clone(), record);
            }
            Err(err) => {
                warn!("record store {path}: skipping line {}: {err}", index + 1);
                report.skipped_lines += 1;
            }
        }
    }
    report.records = records.len();
    Ok((records, report))
}

fn compact(
    path: &Utf8Path,
    dir: &Utf8Path,
    records: &BTreeMap<ArtefactKey, ArtefactRecord>,
) -> Result<(), StoreError> {
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        for record in records.values() {
            writer
                .write_all(&encode_line(record)?)
                .map_err(io_error(path))?;
        }
        writer.flush().map_err(io_error(path))?;
    }
    tmp.as_file().sync_all().map_err(io_error(path))?;
    tmp.persist(path)
        .map_err(|err| io_error(path)(err.error))?;
    Ok(())
}

fn encode_line(record: &ArtefactRecord) -> Result<Vec<u8>, StoreError> {
    let mut line = serde_json::to_vec(record).map_err(|source| StoreError::Encode {
        key: record.key.to_string(),
        source,
    })?;
    line.push(b'\n');
    Ok(line)
}

/// What an append needs from the journal file.
trait JournalFile: Write {
    fn committed_len(&self) -> io::Result<u64>;
    fn sync(&self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl JournalFile for File {
    fn committed_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_data()
    }
}

#[derive(Debug)]
struct AppendFailure {
    source: io::Error,
    // The partial line is still in the file.
    torn: bool,
}

/// Append `line` and sync it, cutting the journal back to its previous
/// length when the write does not complete.
fn append(journal: &mut impl JournalFile, line: &[u8]) -> Result<(), AppendFailure> {
    let committed = journal
        .committed_len()
        .map_err(|source| AppendFailure { source, torn: false })?;
    let Err(source) = journal.write_all(line).and_then(|()| journal.sync()) else {
        return Ok(());
    };
    let torn = journal.truncate(committed).is_err();
    Err(AppendFailure { source, torn })
}

impl RecordStore for JournalStore {
    fn get(&self, key: &ArtefactKey) -> Result<Option<ArtefactRecord>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.records.get(key).cloned())
    }

    fn put(&self, record: &ArtefactRecord) -> Result<(), StoreError> {
        let line = encode_line(record)?;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.torn {
            return Err(StoreError::Unavailable {
                reason: format!("journal {} ends in a partial line until reopened", self.path),
            });
        }
        if let Err(failure) = append(&mut inner.journal, &line) {
            if failure.torn {
                warn!(
                    "record store {}: could not remove a partial line, refusing further writes",
                    self.path
                );
                inner.torn = true;
            }
            return Err(io_error(&self.path)(failure.source));
        }
        inner.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn keys_in(&self, namespace: &Namespace) -> Result<Vec<ArtefactKey>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .records
            .keys()
            .filter(|key| key.namespace() == namespace)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dist_integrity_common::{Artefact, ArtefactVersion, VerificationOutcome};
    use rstest::{fixture, rstest};
    use std::collections::BTreeMap;

    struct Dir {
        _tmp: tempfile::TempDir,
        path: Utf8PathBuf,
    }

    #[fixture]
    fn dir() -> Dir {
        let tmp = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("state/records.jsonl"))
            .expect("utf-8 path");
        Dir { _tmp: tmp, path }
    }

    fn record(path: &str, outcome: VerificationOutcome) -> ArtefactRecord {
        let ns = Namespace::try_from("foo").expect("namespace");
        let artefact = Artefact {
            key: ArtefactKey::new(ns, path).expect("key"),
            version: ArtefactVersion {
                size: 3,
                modified: Utc
                    .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
                    .single()
                    .expect("timestamp"),
            },
        };
        ArtefactRecord::observe(None, &artefact, outcome, BTreeMap::new(), Utc::now())
    }

    #[rstest]
    fn records_survive_reopen(dir: Dir) {
        let first = record("foo-1.0.tar.gz", VerificationOutcome::MissingSignature);
        {
            let (store, report) = JournalStore::open(dir.path.clone()).expect("open");
            assert_eq!(report.records, 0);
            store.put(&first).expect("put");
            store
                .put(&record("foo-1.0.tar.gz", VerificationOutcome::Ok))
                .expect("put");
        }
        let (store, report) = JournalStore::open(dir.path.clone()).expect("reopen");
        assert_eq!(report.records, 1);
        let loaded = store.get(&first.key).expect("get").expect("present");
        assert_eq!(loaded.outcome, VerificationOutcome::Ok);
    }

    #[rstest]
    fn torn_trailing_line_is_skipped(dir: Dir) {
        let kept = record("foo-1.0.tar.gz", VerificationOutcome::Ok);
        {
            let (store, _) = JournalStore::open(dir.path.clone()).expect("open");
            store.put(&kept).expect("put");
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&dir.path)
            .expect("journal");
        file.write_all(b"{\"key\":{\"namespace\":\"foo\",\"pa")
            .expect("torn write");
        drop(file);

        let (store, report) = JournalStore::open(dir.path.clone()).expect("reopen");
        assert_eq!(report.skipped_lines, 1);
        assert!(store.get(&kept.key).expect("get").is_some());
        let compacted = std::fs::read_to_string(&dir.path).expect("read");
        assert_eq!(compacted.lines().count(), 1);
    }

    #[derive(Default)]
    struct FlakyJournal {
        bytes: Vec<u8>,
        // Bytes accepted before writes start failing; `None` accepts all.
        room: Option<usize>,
        truncate_fails: bool,
    }

    impl Write for FlakyJournal {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let Some(room) = self.room else {
                self.bytes.extend_from_slice(buf);
                return Ok(buf.len());
            };
            if room == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            let taken = room.min(buf.len());
            self.bytes.extend_from_slice(&buf[..taken]);
            self.room = Some(room - taken);
            Ok(taken)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl JournalFile for FlakyJournal {
        fn committed_len(&self) -> io::Result<u64> {
            Ok(u64::try_from(self.bytes.len()).expect("length fits"))
        }

        fn sync(&self) -> io::Result<()> {
            Ok(())
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.truncate_fails {
                return Err(io::Error::other("read-only file system"));
            }
            self.bytes
                .truncate(usize::try_from(len).expect("length fits"));
            Ok(())
        }
    }

    #[test]
    fn failed_append_leaves_no_partial_line_behind() {
        let mut journal = FlakyJournal {
            bytes: b"first\n".to_vec(),
            room: Some(4),
            ..FlakyJournal::default()
        };
        let failure = append(&mut journal, b"second\n").expect_err("disk full");
        assert!(!failure.torn);
        assert_eq!(journal.bytes, b"first\n");

        journal.room = None;
        append(&mut journal, b"third\n").expect("space again");
        assert_eq!(journal.bytes, b"first\nthird\n");
    }

    #[test]
    fn failed_cut_back_is_reported_as_torn() {
        let mut journal = FlakyJournal {
            room: Some(3),
            truncate_fails: true,
            ..FlakyJournal::default()
        };
        let failure = append(&mut journal, b"partial\n").expect_err("disk full");
        assert!(failure.torn);
        assert_eq!(journal.bytes, b"par");
    }

    #[rstest]
    fn torn_store_refuses_writes_until_reopened(dir: Dir) {
        let kept = record("foo-1.0.tar.gz", VerificationOutcome::Ok);
        {
            let (store, _) = JournalStore::open(dir.path.clone()).expect("open");
            store.put(&kept).expect("put");
            store
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .torn = true;
            let err = store
                .put(&record("foo-2.0.tar.gz", VerificationOutcome::Ok))
                .expect_err("torn journal");
            assert!(matches!(err, StoreError::Unavailable { .. }));
            assert!(store.get(&kept.key).expect("get").is_some());
        }
        let (store, report) = JournalStore::open(dir.path.clone()).expect("reopen");
        assert_eq!(report.records, 1);
        store
            .put(&record("foo-2.0.tar.gz", VerificationOutcome::Ok))
            .expect("writes resume after reopen");
    }

    #[rstest]
    fn second_open_is_locked_out(dir: Dir) {
        let (_store, _) = JournalStore::open(dir.path.clone()).expect("open");
        let err = JournalStore::open(dir.path.clone()).expect_err("locked");
        assert!(matches!(err, StoreError::Locked { .. }));
    }

    #[rstest]
    fn keys_are_listed_per_namespace(dir: Dir) {
        let (store, _) = JournalStore::open(dir.path.clone()).expect("open");
        store
            .put(&record("a.tar.gz", VerificationOutcome::Ok))
            .expect("put");
        store
            .put(&record("b.tar.gz", VerificationOutcome::Ok))
            .expect("put");
        let foo = Namespace::try_from("foo").expect("namespace");
        let bar = Namespace::try_from("bar").expect("namespace");
        assert_eq!(store.keys_in(&foo).expect("keys").len(), 2);
        assert!(store.keys_in(&bar).expect("keys").is_empty());
    }
}
