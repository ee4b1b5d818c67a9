mod common;

use std::sync::Arc;

use rangezip::extract::{ABORTED_LINE, COMPLETE_LINE};
use rangezip::{Error, RemoteArchive, SessionId, SessionRegistry, SessionState};

use common::{GatedSource, Item, build_zip, noise, open};

fn five_entries() -> Vec<u8> {
    let blobs: Vec<_> = (0..5).map(|i| noise(4096, i)).collect();
    build_zip(&[
        Item::Stored("e1", &blobs[0]),
        Item::Stored("e2", &blobs[1]),
        Item::Stored("e3", &blobs[2]),
        Item::Stored("e4", &blobs[3]),
        Item::Stored("e5", &blobs[4]),
    ])
}

const ALL: [&str; 5] = ["e1", "e2", "e3", "e4", "e5"];

#[tokio::test]
async fn completed_session_reports_each_entry() {
    let archive = open(
        build_zip(&[
            Item::Stored("keep/a.txt", b"a"),
            Item::Deflated("skip.txt", b"not selected"),
            Item::Stored("keep/b.txt", b"b"),
        ]),
        256,
    )
    .await;
    let dest = tempfile::tempdir().unwrap();
    let registry = SessionRegistry::new();

    let session = registry.start(archive, dest.path(), ["keep/a.txt", "keep/b.txt", "absent"]);
    let id = session.id();
    let (lines, outcome) = session.collect().await;

    assert!(outcome.is_ok());
    assert_eq!(
        lines,
        ["Extracting keep/a.txt...", "Extracting keep/b.txt...", COMPLETE_LINE]
    );
    assert_eq!(std::fs::read(dest.path().join("keep/b.txt")).unwrap(), b"b");
    assert!(!dest.path().join("skip.txt").exists());
    assert_eq!(registry.state(&id), None);
    assert_eq!(registry.active(), 0);
}

#[tokio::test]
async fn cancel_stops_before_the_next_entry() {
    let data = five_entries();
    let layout = open(data.clone(), 256).await;
    let gate = layout.entries()[1].lfh_offset + 512;

    let source = GatedSource::new(data, gate);
    let archive = Arc::new(RemoteArchive::open(source.clone(), 256).await.unwrap());
    let dest = tempfile::tempdir().unwrap();
    let registry = SessionRegistry::new();

    let session = registry.start(archive, dest.path(), ALL);
    let id = session.id();

    // e2 is being written now.
    source.reached.notified().await;
    assert_eq!(registry.state(&id), Some(SessionState::Running));
    registry.cancel(&id).unwrap();
    source.release.notify_one();

    let (lines, outcome) = session.collect().await;
    assert!(matches!(outcome, Err(Error::Cancelled)));
    let state = SessionState::from_outcome(&outcome);
    assert_eq!(state, SessionState::Cancelled);
    assert!(state.is_terminal());
    assert_eq!(lines, ["Extracting e1...", "Extracting e2...", ABORTED_LINE]);

    assert!(dest.path().join("e1").exists());
    assert_eq!(std::fs::metadata(dest.path().join("e2")).unwrap().len(), 4096);
    for name in ["e3", "e4", "e5"] {
        assert!(!dest.path().join(name).exists(), "{name} was written");
    }
    assert_eq!(registry.state(&id), None);
}

#[tokio::test]
async fn cancel_before_first_entry_writes_nothing() {
    let archive = open(five_entries(), 1024).await;
    let dest = tempfile::tempdir().unwrap();
    let registry = SessionRegistry::new();

    let session = registry.start(archive, dest.path(), ALL);
    assert_eq!(registry.state(&session.id()), Some(SessionState::Created));
    registry.cancel(&session.id()).unwrap();

    let (lines, outcome) = session.collect().await;
    assert!(matches!(outcome, Err(Error::Cancelled)));
    assert_eq!(lines, [ABORTED_LINE]);
    assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn failing_entry_ends_session_with_error_line() {
    let archive = open(
        build_zip(&[Item::Stored("ok.txt", b"ok"), Item::Stored("../evil.txt", b"no")]),
        256,
    )
    .await;
    let root = tempfile::tempdir().unwrap();
    let dest = root.path().join("out");
    let registry = SessionRegistry::new();

    let session = registry.start(archive, &dest, ["ok.txt", "../evil.txt"]);
    let (lines, outcome) = session.collect().await;

    assert_eq!(SessionState::from_outcome(&outcome), SessionState::Failed);
    assert!(matches!(outcome, Err(Error::Entry { ref file, .. }) if file == "../evil.txt"));
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[..2], ["Extracting ok.txt...", "Extracting ../evil.txt..."]);
    assert!(lines[2].starts_with("ERROR: "), "{}", lines[2]);
    assert!(dest.join("ok.txt").exists());
    assert!(!root.path().join("evil.txt").exists());
}

#[tokio::test]
async fn unknown_sessions_cannot_be_cancelled() {
    let archive = open(five_entries(), 1024).await;
    let dest = tempfile::tempdir().unwrap();
    let registry = SessionRegistry::new();

    let session = registry.start(archive, dest.path(), ["e1"]);
    let id = session.id();
    session.finish().await.unwrap();

    assert!(matches!(registry.cancel(&id), Err(Error::UnknownSession(_))));

    let parsed: SessionId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
    assert!(matches!(
        "not-a-session".parse::<SessionId>(),
        Err(Error::UnknownSession(_))
    ));
}

#[tokio::test]
async fn sessions_are_cancelled_independently() {
    let archive = open(five_entries(), 1024).await;
    let first_dest = tempfile::tempdir().unwrap();
    let second_dest = tempfile::tempdir().unwrap();
    let registry = SessionRegistry::new();

    let first = registry.start(archive.clone(), first_dest.path(), ALL);
    let second = registry.start(archive, second_dest.path(), ALL);
    assert_ne!(first.id(), second.id());
    assert_eq!(registry.active(), 2);

    registry.cancel(&first.id()).unwrap();

    let (first_lines, first_outcome) = first.collect().await;
    let (second_lines, second_outcome) = second.collect().await;

    assert!(matches!(first_outcome, Err(Error::Cancelled)));
    assert_eq!(first_lines, [ABORTED_LINE]);
    assert!(second_outcome.is_ok());
    assert_eq!(second_lines.len(), 6);
    assert_eq!(second_lines.last().map(String::as_str), Some(COMPLETE_LINE));
    assert_eq!(std::fs::read_dir(second_dest.path()).unwrap().count(), 5);
    assert_eq!(registry.active(), 0);
}
