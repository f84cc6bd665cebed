//! Unit tests for the dedup policy and dispatcher.

use super::*;
use crate::store::MemoryRecordStore;
use chrono::TimeZone;
use dist_integrity_common::{Artefact, ArtefactVersion, VerificationOutcome};
use rstest::{fixture, rstest};

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, day, 0, 0, 0)
        .single()
        .expect("timestamp")
}

fn artefact(namespace: &str, path: &str) -> Artefact {
    Artefact {
        key: ArtefactKey::new(Namespace::try_from(namespace).expect("namespace"), path)
            .expect("key"),
        version: ArtefactVersion {
            size: 7,
            modified: at(1),
        },
    }
}

fn record(namespace: &str, path: &str, outcome: VerificationOutcome) -> ArtefactRecord {
    ArtefactRecord::observe(
        None,
        &artefact(namespace, path),
        outcome,
        BTreeMap::new(),
        at(1),
    )
}

fn notified(mut record: ArtefactRecord, kind: OutcomeKind, day: u32) -> ArtefactRecord {
    record.last_notified = Some(NotificationMark { kind, at: at(day) });
    record
}

#[fixture]
fn policy() -> NotificationPolicy {
    NotificationPolicy {
        renotify_cooldown: Duration::from_secs(7 * 24 * 60 * 60),
    }
}

#[rstest]
#[case::ok(VerificationOutcome::Ok)]
#[case::ok_weak(VerificationOutcome::OkWeak)]
fn success_is_never_reported(policy: NotificationPolicy, #[case] outcome: VerificationOutcome) {
    assert_eq!(
        policy.decide(&record("foo", "foo-1.0.tar.gz", outcome), at(2)),
        Decision::Skip
    );
}

#[rstest]
fn first_failure_is_reported(policy: NotificationPolicy) {
    let record = record("foo", "foo-1.0.tar.gz", VerificationOutcome::MissingSignature);
    assert_eq!(
        policy.decide(&record, at(1)),
        Decision::Notify(NotifyReason::FirstFailure)
    );
}

#[rstest]
fn reported_failure_inside_cooldown_is_skipped(policy: NotificationPolicy) {
    let record = notified(
        record("foo", "foo-1.0.tar.gz", VerificationOutcome::MissingSignature),
        OutcomeKind::MissingSignature,
        1,
    );
    assert_eq!(policy.decide(&record, at(7)), Decision::Skip);
}

#[rstest]
fn reported_failure_after_cooldown_is_reported_again(policy: NotificationPolicy) {
    let record = notified(
        record("foo", "foo-1.0.tar.gz", VerificationOutcome::MissingSignature),
        OutcomeKind::MissingSignature,
        1,
    );
    assert_eq!(
        policy.decide(&record, at(8)),
        Decision::Notify(NotifyReason::CooldownElapsed {
            last_notified: at(1)
        })
    );
}

#[rstest]
fn changed_category_is_reported_immediately(policy: NotificationPolicy) {
    let record = notified(
        record("foo", "foo-1.0.tar.gz", VerificationOutcome::missing_manifest()),
        OutcomeKind::MissingSignature,
        1,
    );
    assert_eq!(
        policy.decide(&record, at(1)),
        Decision::Notify(NotifyReason::OutcomeChanged {
            previous: OutcomeKind::MissingSignature
        })
    );
}

fn shared(store: &Arc<MemoryRecordStore>) -> Arc<dyn RecordStore> {
    Arc::clone(store) as Arc<dyn RecordStore>
}

fn dispatcher(transport: MockNotificationTransport) -> NotificationDispatcher {
    NotificationDispatcher::new(
        NotificationPolicy::default(),
        Arc::new(transport),
        RecipientResolver::new("example.org")
            .with_extra_recipients(vec!["ops@example.org".to_owned()]),
        MessageComposer::new("checker@example.org", "downloads.example.org"),
    )
}

#[tokio::test]
async fn one_message_per_project_and_records_are_marked() {
    let mut transport = MockNotificationTransport::new();
    transport
        .expect_send()
        .withf(|message: &Notification| {
            message.namespace.as_str() == "foo"
                && message.artefacts.len() == 2
                && message.recipients == ["private@foo.example.org", "ops@example.org"]
        })
        .times(1)
        .returning(|_| Ok(()));
    transport
        .expect_send()
        .withf(|message: &Notification| message.namespace.as_str() == "bar")
        .times(1)
        .returning(|_| Ok(()));
    let store = Arc::new(MemoryRecordStore::new());
    let records = vec![
        record("foo", "foo-1.0.tar.gz", VerificationOutcome::MissingSignature),
        record("foo", "foo-1.0.zip", VerificationOutcome::missing_manifest()),
        record("bar", "bar-2.0.tar.gz", VerificationOutcome::MissingSignature),
        record("baz", "baz-3.0.tar.gz", VerificationOutcome::Ok),
    ];

    let report = dispatcher(transport)
        .dispatch(&shared(&store), records, at(2))
        .await
        .expect("store writable");

    assert_eq!(report.notified.len(), 3);
    assert!(report.failed.is_empty());
    let marks: Vec<_> = store
        .records()
        .into_iter()
        .filter_map(|r| r.last_notified)
        .collect();
    assert_eq!(marks.len(), 3);
    assert!(marks.iter().all(|mark| mark.at == at(2)));
}

#[tokio::test]
async fn failed_send_leaves_records_unmarked() {
    let mut transport = MockNotificationTransport::new();
    transport.expect_send().times(1).returning(|_| {
        Err(TransportError::Timeout {
            program: "sendmail".into(),
            seconds: 60,
        })
    });
    let store = Arc::new(MemoryRecordStore::new());
    let records = vec![record(
        "foo",
        "foo-1.0.tar.gz",
        VerificationOutcome::MissingSignature,
    )];

    let report = dispatcher(transport)
        .dispatch(&shared(&store), records, at(2))
        .await
        .expect("store writable");

    assert!(report.notified.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn already_reported_failure_is_not_sent_again() {
    let mut transport = MockNotificationTransport::new();
    transport.expect_send().times(0);
    let store = Arc::new(MemoryRecordStore::new());
    let records = vec![notified(
        record("foo", "foo-1.0.tar.gz", VerificationOutcome::MissingSignature),
        OutcomeKind::MissingSignature,
        1,
    )];

    let report = dispatcher(transport)
        .dispatch(&shared(&store), records, at(2))
        .await
        .expect("store writable");
    assert_eq!(report, DispatchReport::default());
}

#[tokio::test]
async fn mark_write_failure_is_returned() {
    let mut transport = MockNotificationTransport::new();
    transport.expect_send().times(1).returning(|_| Ok(()));
    let store = Arc::new(MemoryRecordStore::failing());
    let records = vec![record(
        "foo",
        "foo-1.0.tar.gz",
        VerificationOutcome::MissingSignature,
    )];

    let result = dispatcher(transport).dispatch(&shared(&store), records, at(2)).await;
    assert!(matches!(result, Err(StoreError::Unavailable { .. })));
}
