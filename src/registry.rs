//! The object registry: at most one live, valid object per primary path.
//!
//! Objects are held weakly. A dropped or invalidated object leaves a stale
//! entry behind that is purged lazily on access, or eagerly by
//! [`Registry::reclaim`].
//!
//! Construction is two-phase. [`Registry::register`] reserves the path and
//! hands back a [`Registration`]; the caller builds the object, calls
//! [`Registration::complete`], delivers creation events, and only then
//! publishes the object with [`Registry::notify_created`]. Other threads
//! that look up the path while it is reserved wait (bounded) for the
//! reservation to resolve.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::events::{Event, Notifier, PROP_VALID};
use crate::object::{DataObject, ObjectCore};
use crate::recognize::LoaderId;

/// How long a lookup will wait on another thread's in-flight construction
/// before giving up and returning `None`.
const PENDING_WAIT: Duration = Duration::from_secs(5);

struct Item {
    seq: u64,
    loader: LoaderId,
    object: Weak<ObjectCore>,
}

impl Item {
    fn live(&self) -> Option<DataObject> {
        let core = self.object.upgrade()?;
        if !core.is_valid() {
            return None;
        }
        Some(DataObject::from_core(core))
    }
}

#[derive(Default)]
struct Inner {
    items: HashMap<PathBuf, Item>,
    pending: HashMap<PathBuf, ThreadId>,
}

pub(crate) struct Registry {
    inner: Mutex<Inner>,
    resolved: Condvar,
    next_seq: AtomicU64,
}

/// The outcome of asking the registry for a fresh registration.
pub(crate) enum Claimed<'a> {
    /// The path was free; the caller must construct the object.
    Fresh(Registration<'a>),
    /// A live object already owns the path; use it instead.
    Existing(DataObject),
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: Mutex::new(Inner::default()),
            resolved: Condvar::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Looks up the live object registered at `path`.
    ///
    /// If another thread is mid-construction for the same path, waits up to
    /// [`PENDING_WAIT`] for it to finish; the constructing thread itself is
    /// answered immediately with whatever is indexed so far.
    pub fn find(&self, path: &Path) -> Option<DataObject> {
        let me = thread::current().id();
        let deadline = Instant::now() + PENDING_WAIT;
        let mut inner = self.lock();

        loop {
            match inner.pending.get(path) {
                Some(owner) if *owner != me => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        log::warn!(
                            "Lookup of {} timed out waiting on in-flight construction",
                            path.display()
                        );
                        return None;
                    }
                    inner = self
                        .resolved
                        .wait_timeout(inner, remaining)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
                _ => {
                    let found = inner.items.get(path).and_then(Item::live);
                    if found.is_none() && inner.items.contains_key(path) {
                        inner.items.remove(path);
                    }
                    return found;
                }
            }
        }
    }

    /// Claims `path` for construction by `loader`.
    ///
    /// If a live object of the same loader already owns the path, returns it.
    /// If a live object of a *different* loader owns it, that object is asked
    /// to invalidate; a veto means the existing object stays and is returned.
    pub fn register(&self, path: &Path, loader: LoaderId) -> Claimed<'_> {
        let me = thread::current().id();
        let mut inner = self.lock();

        loop {
            if let Some(owner) = inner.pending.get(path) {
                if *owner == me {
                    // Reentrant recognition of the path we are constructing.
                    if let Some(existing) = inner.items.get(path).and_then(Item::live) {
                        return Claimed::Existing(existing);
                    }
                    panic!(
                        "attempted duplicate construction of {} on its own constructing thread",
                        path.display()
                    );
                }
                inner = self
                    .resolved
                    .wait(inner)
                    .unwrap_or_else(|e| e.into_inner());
                continue;
            }

            if let Some(item) = inner.items.get(path) {
                match item.live() {
                    Some(existing) => {
                        if item.loader == loader {
                            return Claimed::Existing(existing);
                        }

                        // A different loader wants the path: the old object
                        // must agree to step aside.
                        drop(inner);
                        if existing.request_invalidate().is_err() {
                            return Claimed::Existing(existing);
                        }
                        inner = self.lock();
                        continue;
                    }
                    None => {
                        inner.items.remove(path);
                    }
                }
            }

            inner.pending.insert(path.to_owned(), me);
            return Claimed::Fresh(Registration {
                registry: self,
                path: path.to_owned(),
                loader,
                completed: false,
            });
        }
    }

    /// Publishes a constructed object: creation listeners run first, on the
    /// calling thread, and only then does the path stop being pending, at
    /// which point waiting lookups can see the object.
    pub fn notify_created(&self, path: &Path, notifier: &Notifier) {
        notifier.deliver_sync(&Event::ObjectCreated {
            path: path.to_owned(),
        });

        let mut inner = self.lock();
        inner.pending.remove(path);
        self.resolved.notify_all();
    }

    /// Removes the entry at `path`, but only if it still describes the same
    /// incarnation (`seq`) the caller knows about.
    ///
    /// Only the index entry goes away. Refreshing the parent folder so the
    /// removal becomes visible in child lists is the disposing caller's job.
    pub fn deregister(&self, path: &Path, seq: u64) {
        let mut inner = self.lock();
        if inner.items.get(path).map(|item| item.seq) == Some(seq) {
            inner.items.remove(path);
            self.resolved.notify_all();
        }
    }

    /// Re-keys every entry at or under `old` to the corresponding path under
    /// `new`, updating each live object's file paths to match.
    pub fn rekey_prefix(&self, old: &Path, new: &Path) {
        let mut inner = self.lock();

        let moved: Vec<PathBuf> = inner
            .items
            .keys()
            .filter(|key| key.starts_with(old))
            .cloned()
            .collect();

        for key in moved {
            let Some(mut item) = inner.items.remove(&key) else {
                continue;
            };
            let suffix = key.strip_prefix(old).unwrap_or(&key);
            let new_key = new.join(suffix);

            item.seq = self.bump_seq();
            if let Some(core) = item.object.upgrade() {
                core.rebase(&key, &new_key, item.seq);
            }
            inner.items.insert(new_key, item);
        }

        self.resolved.notify_all();
    }

    /// Forcibly invalidates and removes every entry at or under `prefix`.
    /// Returns the objects that were still live, deepest first.
    pub fn dispose_subtree(&self, prefix: &Path, notifier: &Notifier) -> Vec<DataObject> {
        let mut inner = self.lock();

        let doomed: Vec<PathBuf> = inner
            .items
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        let mut disposed = Vec::new();
        for key in doomed {
            if let Some(item) = inner.items.remove(&key) {
                if let Some(object) = item.live() {
                    disposed.push(object);
                }
            }
        }
        self.resolved.notify_all();
        drop(inner);

        disposed.sort_by(|a, b| b.primary_path().cmp(&a.primary_path()));
        for object in &disposed {
            object.core().mark_invalid();
            notifier.post(Event::Property {
                path: object.primary_path(),
                name: PROP_VALID,
            });
        }

        disposed
    }

    /// Drops every entry whose object has been collected or invalidated.
    pub fn reclaim(&self) {
        let mut inner = self.lock();
        inner
            .items
            .retain(|_, item| item.object.upgrade().is_some_and(|core| core.is_valid()));
    }
}

/// A claim on a path, held while the object is being constructed.
///
/// Dropping a registration without completing it releases the reservation,
/// so a failed construction never wedges the path.
pub(crate) struct Registration<'a> {
    registry: &'a Registry,
    path: PathBuf,
    loader: LoaderId,
    completed: bool,
}

impl Registration<'_> {
    /// Indexes the constructed object under the reserved path and stamps it
    /// with its incarnation number. The path stays pending until
    /// [`Registry::notify_created`] runs.
    pub fn complete(mut self, object: &DataObject) {
        let seq = self.registry.bump_seq();
        object.core().set_item_seq(seq);

        let mut inner = self.registry.lock();
        inner.items.insert(
            self.path.clone(),
            Item {
                seq,
                loader: self.loader,
                object: object.downgrade(),
            },
        );
        self.completed = true;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let mut inner = self.registry.lock();
            inner.pending.remove(&self.path);
            self.registry.resolved.notify_all();
        }
    }
}
