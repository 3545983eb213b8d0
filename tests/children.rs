//! Folder child lists: completeness, ordering, and refresh behavior.

use std::path::Path;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use resfs::{InMemoryFs, Vfs, VfsSnapshot};

use arbor::{
    DataObject, PairedFileRecognizer, RecognizerChain, Session, SortMode,
};

fn session_with(snapshot: VfsSnapshot) -> Session {
    let mut imfs = InMemoryFs::new();
    imfs.load_snapshot("/root", snapshot).unwrap();
    Session::new(Vfs::new(imfs))
}

fn names(children: &[DataObject]) -> Vec<String> {
    children.iter().map(DataObject::file_name).collect()
}

#[test]
fn default_sort_is_folders_first_then_name() {
    let session = session_with(VfsSnapshot::dir([
        ("z.txt", VfsSnapshot::file("z")),
        ("m", VfsSnapshot::empty_dir()),
        ("a.txt", VfsSnapshot::file("a")),
    ]));

    let folder = session.folder(Path::new("/root")).unwrap();
    let children = folder.get_children().unwrap();

    insta::assert_yaml_snapshot!(names(&children), @r###"
    - m
    - a.txt
    - z.txt
    "###);
}

#[test]
fn rename_updates_order_and_keeps_identity() {
    let session = session_with(VfsSnapshot::dir([(
        "P",
        VfsSnapshot::dir([
            ("C", VfsSnapshot::empty_dir()),
            ("a.txt", VfsSnapshot::file("a")),
            ("b.txt", VfsSnapshot::file("b")),
        ]),
    )]));

    let folder = session.folder(Path::new("/root/P")).unwrap();
    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["C", "a.txt", "b.txt"],
    );

    let object = session.find_or_recognize(Path::new("/root/P/a.txt")).unwrap();
    object.rename("z").unwrap();

    folder.refresh().unwrap().wait();
    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["C", "b.txt", "z.txt"],
    );

    // The rename moved the object, not replaced it.
    assert_eq!(session.find(Path::new("/root/P/z.txt")).unwrap(), object);
    assert_eq!(object.primary_path(), Path::new("/root/P/z.txt"));
}

#[test]
fn secondary_files_do_not_become_children() {
    let chain = RecognizerChain::with_front(Arc::new(PairedFileRecognizer::new(
        "form",
        "form",
        vec!["java".to_owned()],
    )));
    let mut imfs = InMemoryFs::new();
    imfs.load_snapshot(
        "/root",
        VfsSnapshot::dir([
            ("widget.form", VfsSnapshot::file("layout")),
            ("widget.java", VfsSnapshot::file("code")),
            ("other.txt", VfsSnapshot::file("text")),
        ]),
    )
    .unwrap();
    let session = Session::with_chain(Vfs::new(imfs), chain);

    let folder = session.folder(Path::new("/root")).unwrap();
    let children = folder.get_children().unwrap();

    assert_eq!(names(&children), vec!["other.txt", "widget.form"]);

    // Probing the companion resolves to the grouped object.
    let via_companion = session
        .find_or_recognize(Path::new("/root/widget.java"))
        .unwrap();
    let grouped = children
        .iter()
        .find(|c| c.file_name() == "widget.form")
        .unwrap();
    assert_eq!(&via_companion, grouped);
    assert_eq!(
        via_companion.files(),
        vec![
            Path::new("/root/widget.form").to_owned(),
            Path::new("/root/widget.java").to_owned(),
        ],
    );
}

#[test]
fn children_are_cached_between_reads() {
    let session = session_with(VfsSnapshot::dir([
        ("a.txt", VfsSnapshot::file("a")),
        ("b.txt", VfsSnapshot::file("b")),
    ]));

    let folder = session.folder(Path::new("/root")).unwrap();
    let first = folder.get_children().unwrap();
    let second = folder.get_children().unwrap();

    assert_eq!(first, second);
}

#[test]
fn sort_mode_names_ignores_kind() {
    let session = session_with(VfsSnapshot::dir([
        ("m", VfsSnapshot::empty_dir()),
        ("a.txt", VfsSnapshot::file("a")),
        ("z.txt", VfsSnapshot::file("z")),
    ]));

    let folder = session.folder(Path::new("/root")).unwrap();
    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["m", "a.txt", "z.txt"],
    );

    folder.set_sort_mode(SortMode::Names).unwrap().wait();
    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["a.txt", "m", "z.txt"],
    );
    assert_eq!(folder.sort_mode().unwrap(), SortMode::Names);
}

#[test]
fn natural_sort_compares_numbers_by_value() {
    let session = session_with(VfsSnapshot::dir([
        ("file10.txt", VfsSnapshot::file("")),
        ("file1.txt", VfsSnapshot::file("")),
        ("file2.txt", VfsSnapshot::file("")),
    ]));

    let folder = session.folder(Path::new("/root")).unwrap();
    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["file1.txt", "file10.txt", "file2.txt"],
    );

    folder.set_sort_mode(SortMode::Natural).unwrap().wait();
    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["file1.txt", "file2.txt", "file10.txt"],
    );
}

#[test]
fn reapplying_a_sort_mode_is_idempotent() {
    let session = session_with(VfsSnapshot::dir([
        ("m", VfsSnapshot::empty_dir()),
        ("z.txt", VfsSnapshot::file("z")),
        ("a.txt", VfsSnapshot::file("a")),
    ]));

    let folder = session.folder(Path::new("/root")).unwrap();
    folder.set_sort_mode(SortMode::Names).unwrap().wait();
    let first = names(&folder.get_children().unwrap());

    folder.set_sort_mode(SortMode::Names).unwrap().wait();
    let second = names(&folder.get_children().unwrap());

    assert_eq!(first, vec!["a.txt", "m", "z.txt"]);
    assert_eq!(first, second);
}

#[test]
fn size_sort_puts_largest_first() {
    let session = session_with(VfsSnapshot::dir([
        ("small.txt", VfsSnapshot::file("x")),
        ("big.txt", VfsSnapshot::file("xxxxxxxxxx")),
        ("sub", VfsSnapshot::empty_dir()),
    ]));

    let folder = session.folder(Path::new("/root")).unwrap();
    folder.set_sort_mode(SortMode::Size).unwrap().wait();

    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["sub", "big.txt", "small.txt"],
    );
}

#[test]
fn pinned_children_come_first_in_pinned_order() {
    let session = session_with(VfsSnapshot::dir([
        ("a.txt", VfsSnapshot::file("a")),
        ("b.txt", VfsSnapshot::file("b")),
        ("z.txt", VfsSnapshot::file("z")),
    ]));

    let folder = session.folder(Path::new("/root")).unwrap();
    folder
        .set_order(&["z.txt".to_owned(), "b.txt".to_owned()])
        .unwrap()
        .wait();

    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["z.txt", "b.txt", "a.txt"],
    );
    assert_eq!(folder.pinned_order().unwrap(), vec!["z.txt", "b.txt"]);

    // A pin for a child that does not exist is ignored.
    folder
        .set_order(&["ghost.txt".to_owned(), "b.txt".to_owned()])
        .unwrap()
        .wait();
    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["b.txt", "a.txt", "z.txt"],
    );
}

#[test]
fn refresh_picks_up_external_changes() {
    let session = session_with(VfsSnapshot::dir([("a.txt", VfsSnapshot::file("a"))]));

    let folder = session.folder(Path::new("/root")).unwrap();
    assert_eq!(names(&folder.get_children().unwrap()), vec!["a.txt"]);

    session.vfs().write("/root/b.txt", "b").unwrap();
    folder.refresh().unwrap().wait();
    assert_eq!(
        names(&folder.get_children().unwrap()),
        vec!["a.txt", "b.txt"],
    );

    session.vfs().remove_file("/root/a.txt").unwrap();
    folder.refresh().unwrap().wait();
    assert_eq!(names(&folder.get_children().unwrap()), vec!["b.txt"]);
}

#[test]
fn compute_children_delivers_without_blocking() {
    let session = session_with(VfsSnapshot::dir([("a.txt", VfsSnapshot::file("a"))]));

    let folder = session.folder(Path::new("/root")).unwrap();
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);

    folder
        .compute_children(move |children| {
            *seen_clone.lock().unwrap() = Some(names(children));
        })
        .unwrap()
        .wait();

    assert_eq!(seen.lock().unwrap().clone(), Some(vec!["a.txt".to_owned()]));
}

#[test]
fn filter_listener_observes_published_lists() {
    let session = session_with(VfsSnapshot::dir([("a.txt", VfsSnapshot::file("a"))]));

    let folder = session.folder(Path::new("/root")).unwrap();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_clone = Arc::clone(&observed);
    folder
        .set_children_filter(Box::new(move |children| {
            observed_clone.lock().unwrap().push(names(children));
        }))
        .unwrap();

    folder.get_children().unwrap();
    session.vfs().write("/root/b.txt", "b").unwrap();
    folder.refresh().unwrap().wait();

    let observed = observed.lock().unwrap().clone();
    assert!(observed.contains(&vec!["a.txt".to_owned(), "b.txt".to_owned()]));
}

#[test]
fn empty_folder_has_no_children() {
    let session = session_with(VfsSnapshot::dir([("sub", VfsSnapshot::empty_dir())]));
    let folder = session.folder(Path::new("/root/sub")).unwrap();
    assert!(folder.get_children().unwrap().is_empty());
}
