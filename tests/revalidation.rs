//! Revalidation: re-running recognition after the rules change.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use resfs::{InMemoryFs, Vfs, VfsSnapshot};

use arbor::{
    Claim, LoaderId, ObjectKind, Recognizer, RecognizerChain, Session, DEFAULT_LOADER,
};

/// Claims `.special` files, but only once enabled. Simulates a recognizer
/// whose rules change at runtime.
struct ToggleRecognizer {
    enabled: Arc<AtomicBool>,
}

impl Recognizer for ToggleRecognizer {
    fn id(&self) -> LoaderId {
        LoaderId("special")
    }

    fn try_claim(&self, _vfs: &Vfs, path: &Path) -> anyhow::Result<Option<Claim>> {
        let claims = self.enabled.load(Ordering::SeqCst)
            && path.extension().is_some_and(|ext| ext == "special");
        Ok(claims.then(|| Claim::solo(path, ObjectKind::File)))
    }
}

fn toggled_session() -> (Session, Arc<AtomicBool>) {
    let enabled = Arc::new(AtomicBool::new(false));
    let chain = RecognizerChain::with_front(Arc::new(ToggleRecognizer {
        enabled: Arc::clone(&enabled),
    }));

    let mut imfs = InMemoryFs::new();
    imfs.load_snapshot(
        "/root",
        VfsSnapshot::dir([
            ("a.special", VfsSnapshot::file("a")),
            ("b.txt", VfsSnapshot::file("b")),
        ]),
    )
    .unwrap();

    (Session::with_chain(Vfs::new(imfs), chain), enabled)
}

#[test]
fn loader_change_replaces_the_object() {
    let (session, enabled) = toggled_session();
    let path = Path::new("/root/a.special");

    let old = session.find_or_recognize(path).unwrap();
    assert_eq!(old.loader(), DEFAULT_LOADER);

    enabled.store(true, Ordering::SeqCst);
    let refused = session.revalidate([path.to_owned()]);
    assert!(refused.is_empty());

    assert!(!old.is_valid());
    let new = session.find(path).unwrap();
    assert_ne!(new, old);
    assert_eq!(new.loader(), LoaderId("special"));
}

#[test]
fn unchanged_claims_leave_objects_alone() {
    let (session, enabled) = toggled_session();
    let path = Path::new("/root/b.txt");

    let object = session.find_or_recognize(path).unwrap();
    enabled.store(true, Ordering::SeqCst);

    let refused = session.revalidate([path.to_owned()]);
    assert!(refused.is_empty());
    assert!(object.is_valid());
    assert_eq!(session.find(path).unwrap(), object);
}

#[test]
fn modified_objects_veto_replacement() {
    let (session, enabled) = toggled_session();
    let path = Path::new("/root/a.special");

    let object = session.find_or_recognize(path).unwrap();
    object.set_modified(true).unwrap();
    enabled.store(true, Ordering::SeqCst);

    let refused = session.revalidate([path.to_owned()]);
    assert_eq!(refused, vec![object.clone()]);
    assert!(object.is_valid());
    assert_eq!(session.find(path).unwrap(), object);
    assert_eq!(object.loader(), DEFAULT_LOADER);

    // Once the changes are saved, revalidation goes through.
    object.set_modified(false).unwrap();
    let refused = session.revalidate([path.to_owned()]);
    assert!(refused.is_empty());
    assert!(!object.is_valid());
    assert_eq!(session.find(path).unwrap().loader(), LoaderId("special"));
}

#[test]
fn veto_listener_blocks_replacement() {
    let (session, enabled) = toggled_session();
    let path = Path::new("/root/a.special");

    let object = session.find_or_recognize(path).unwrap();
    object.add_veto_listener(|_| true);
    enabled.store(true, Ordering::SeqCst);

    let refused = session.revalidate([path.to_owned()]);
    assert_eq!(refused.len(), 1);
    assert!(object.is_valid());
}

#[test]
fn unrecognized_paths_are_skipped() {
    let (session, _) = toggled_session();
    let refused = session.revalidate([Path::new("/root/ghost.txt").to_owned()]);
    assert!(refused.is_empty());
}

#[test]
fn revalidation_completes_inside_an_atomic_section() {
    let (session, enabled) = toggled_session();
    let path = Path::new("/root/a.special");

    session.find_or_recognize(path).unwrap();
    enabled.store(true, Ordering::SeqCst);

    // The revalidation worker is admitted on the holder's behalf, so this
    // must not deadlock even though the section covers the whole tree.
    let refused = session.run_atomic(Path::new("/root"), || {
        session.revalidate([path.to_owned()])
    });
    assert!(refused.is_empty());
    assert_eq!(session.find(path).unwrap().loader(), LoaderId("special"));
}

#[test]
fn new_recognition_uses_the_new_loader_directly() {
    let (session, enabled) = toggled_session();
    enabled.store(true, Ordering::SeqCst);

    let object = session
        .find_or_recognize(Path::new("/root/a.special"))
        .unwrap();
    assert_eq!(object.loader(), LoaderId("special"));
}
