//! Object identity: at most one live object per path, no matter how many
//! threads ask, and creation events land before the object is findable.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use pretty_assertions::assert_eq;
use resfs::{InMemoryFs, Vfs, VfsSnapshot};

use arbor::{Event, ObjectKind, Session};

fn session_with(snapshot: VfsSnapshot) -> Session {
    let mut imfs = InMemoryFs::new();
    imfs.load_snapshot("/root", snapshot).unwrap();
    Session::new(Vfs::new(imfs))
}

#[test]
fn same_path_resolves_to_same_object() {
    let session = session_with(VfsSnapshot::dir([("a.txt", VfsSnapshot::file("hi"))]));

    let first = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();
    let second = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.kind(), ObjectKind::File);
}

#[test]
fn concurrent_recognition_yields_one_object() {
    let session = session_with(VfsSnapshot::dir([("a.txt", VfsSnapshot::file("hi"))]));

    let objects: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| session.find_or_recognize(Path::new("/root/a.txt")).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for object in &objects[1..] {
        assert_eq!(&objects[0], object);
    }
}

#[test]
fn find_does_not_recognize() {
    let session = session_with(VfsSnapshot::dir([("a.txt", VfsSnapshot::file("hi"))]));

    assert!(session.find(Path::new("/root/a.txt")).is_none());

    let object = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();
    assert_eq!(session.find(Path::new("/root/a.txt")).unwrap(), object);
}

#[test]
fn nothing_recognized_at_missing_path() {
    let session = session_with(VfsSnapshot::empty_dir());
    assert!(session.find_or_recognize(Path::new("/root/ghost.txt")).is_none());
}

#[test]
fn creation_event_precedes_visibility() {
    let session = session_with(VfsSnapshot::dir([("a.txt", VfsSnapshot::file("hi"))]));

    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = Arc::clone(&log);
    session.subscribe(move |event| {
        if let Event::ObjectCreated { path } = event {
            log_clone
                .lock()
                .unwrap()
                .push(("created", path.clone(), thread::current().id()));
        }
    });

    let object = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();
    let entries = log.lock().unwrap().clone();

    // Delivered synchronously, on the recognizing thread, before the call
    // returned the object.
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, object.primary_path());
    assert_eq!(entries[0].2, thread::current().id());
}

#[test]
fn collected_objects_vanish_from_the_registry() {
    let session = session_with(VfsSnapshot::dir([("a.txt", VfsSnapshot::file("hi"))]));

    let object = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();
    drop(object);
    session.reclaim();

    assert!(session.find(Path::new("/root/a.txt")).is_none());

    // Recognition starts over with a fresh object.
    assert!(session.find_or_recognize(Path::new("/root/a.txt")).is_some());
}

#[test]
fn folder_and_file_kinds_are_distinct() {
    let session = session_with(VfsSnapshot::dir([
        ("sub", VfsSnapshot::empty_dir()),
        ("a.txt", VfsSnapshot::file("hi")),
    ]));

    let folder = session.folder(Path::new("/root/sub")).unwrap();
    assert_eq!(folder.as_object().kind(), ObjectKind::Folder);

    assert!(session.folder(Path::new("/root/a.txt")).is_err());
}
