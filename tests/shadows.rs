//! Shadows: creation, resolution, and synchronization with their targets.

use std::path::Path;

use pretty_assertions::assert_eq;
use resfs::{InMemoryFs, Vfs, VfsSnapshot};

use arbor::{ObjectKind, Session};

fn session_with(snapshot: VfsSnapshot) -> Session {
    let mut imfs = InMemoryFs::new();
    imfs.load_snapshot("/root", snapshot).unwrap();
    Session::new(Vfs::new(imfs))
}

#[test]
fn shadow_resolves_to_its_target() {
    let session = session_with(VfsSnapshot::dir([
        ("a.txt", VfsSnapshot::file("a")),
        ("D", VfsSnapshot::empty_dir()),
    ]));

    let target = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();
    let dest = session.folder(Path::new("/root/D")).unwrap();

    let shadow = target.create_shadow(&dest).unwrap();
    assert_eq!(shadow.path(), Path::new("/root/D/a.shadow"));
    assert_eq!(shadow.as_object().kind(), ObjectKind::Shadow);
    assert_eq!(shadow.target_path().unwrap(), Path::new("/root/a.txt"));
    assert_eq!(shadow.target().unwrap().unwrap(), target);
}

#[test]
fn shadow_files_are_recognized_as_shadows() {
    let session = session_with(VfsSnapshot::dir([
        ("a.txt", VfsSnapshot::file("a")),
        ("link.shadow", VfsSnapshot::file("/root/a.txt")),
    ]));

    let shadow = session.shadow(Path::new("/root/link.shadow")).unwrap();
    let target = shadow.target().unwrap().unwrap();
    assert_eq!(target.primary_path(), Path::new("/root/a.txt"));
}

#[test]
fn moving_the_target_retargets_its_shadows() {
    let session = session_with(VfsSnapshot::dir([
        ("a.txt", VfsSnapshot::file("a")),
        ("D", VfsSnapshot::empty_dir()),
        ("E", VfsSnapshot::empty_dir()),
    ]));

    let target = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();
    let links = session.folder(Path::new("/root/D")).unwrap();
    let shadow = target.create_shadow(&links).unwrap();

    let new_home = session.folder(Path::new("/root/E")).unwrap();
    target.move_to(&new_home).unwrap();

    assert_eq!(shadow.target_path().unwrap(), Path::new("/root/E/a.txt"));
    assert_eq!(shadow.target().unwrap().unwrap(), target);
}

#[test]
fn renaming_the_target_rewrites_its_shadows() {
    let session = session_with(VfsSnapshot::dir([
        ("a.txt", VfsSnapshot::file("a")),
        ("D", VfsSnapshot::empty_dir()),
    ]));

    let target = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();
    let links = session.folder(Path::new("/root/D")).unwrap();
    let shadow = target.create_shadow(&links).unwrap();

    target.rename("z").unwrap();

    assert_eq!(shadow.target_path().unwrap(), Path::new("/root/z.txt"));
}

#[test]
fn deleting_the_target_breaks_the_shadow() {
    let session = session_with(VfsSnapshot::dir([
        ("a.txt", VfsSnapshot::file("a")),
        ("D", VfsSnapshot::empty_dir()),
    ]));

    let target = session.find_or_recognize(Path::new("/root/a.txt")).unwrap();
    let links = session.folder(Path::new("/root/D")).unwrap();
    let shadow = target.create_shadow(&links).unwrap();

    target.delete().unwrap();

    // The shadow object was invalidated; the file survives and resolves as
    // a broken link from then on.
    assert!(!shadow.as_object().is_valid());
    assert!(session.vfs().exists("/root/D/a.shadow").unwrap());

    let broken = session.shadow(Path::new("/root/D/a.shadow")).unwrap();
    assert!(broken.target().unwrap().is_none());
}
