//! The operation gate: a process-wide, reentrant critical section that
//! structural operations hold while they mutate files and publish the
//! results.
//!
//! While a thread holds the gate, recognition of anything under the gate's
//! target path is held back until the gate is released, so observers never
//! see an operation's intermediate file layout. Recognition of disjoint
//! subtrees proceeds freely, and so do sections over disjoint targets:
//! only sections whose targets overlap serialize against each other.

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use crate::worker::current_pool_tag;

struct Holder {
    owner: ThreadId,
    target: PathBuf,
    depth: u32,
    delegate: Option<&'static str>,
}

pub(crate) struct OperationGate {
    holders: Mutex<Vec<Holder>>,
    released: Condvar,
}

impl OperationGate {
    pub fn new() -> Self {
        OperationGate {
            holders: Mutex::new(Vec::new()),
            released: Condvar::new(),
        }
    }

    /// Runs `f` with the gate held over `target`. Reentrant: nested calls from
    /// the holding thread run immediately under the outermost target, and the
    /// hold is released only when the outermost call returns. Sections over
    /// disjoint targets run concurrently; a section whose target overlaps a
    /// held one waits for that hold to release.
    pub fn run_atomic<T>(&self, target: &Path, f: impl FnOnce() -> T) -> T {
        self.enter(target, None);
        let _guard = GateGuard(self);
        f()
    }

    /// Like [`run_atomic`](Self::run_atomic), but also admits recognition
    /// tasks running on the named worker queue while the gate is held. Used
    /// when the operation needs child lists computed on its behalf.
    pub fn run_atomic_delegating<T>(
        &self,
        target: &Path,
        pool: &'static str,
        f: impl FnOnce() -> T,
    ) -> T {
        self.enter(target, Some(pool));
        let _guard = GateGuard(self);
        f()
    }

    /// Temporarily extends the calling holder's admission to work running on
    /// the named worker queue, for the duration of `f`. Lets a section wait
    /// on background work that itself needs admission under the held target.
    /// A no-op when the caller does not hold the gate.
    pub fn with_delegate<T>(&self, pool: &'static str, f: impl FnOnce() -> T) -> T {
        let me = thread::current().id();
        let previous = {
            let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
            match holders.iter_mut().find(|h| h.owner == me) {
                Some(held) => {
                    let previous = held.delegate;
                    held.delegate = Some(pool);
                    self.released.notify_all();
                    Some(previous)
                }
                None => None,
            }
        };

        let output = f();

        if let Some(previous) = previous {
            let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(held) = holders.iter_mut().find(|h| h.owner == me) {
                held.delegate = previous;
            }
        }
        output
    }

    fn enter(&self, target: &Path, delegate: Option<&'static str>) {
        let me = thread::current().id();
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(held) = holders.iter_mut().find(|h| h.owner == me) {
            held.depth += 1;
            return;
        }

        while holders.iter().any(|h| paths_overlap(target, &h.target)) {
            holders = self
                .released
                .wait(holders)
                .unwrap_or_else(|e| e.into_inner());
        }

        holders.push(Holder {
            owner: me,
            target: target.to_owned(),
            depth: 1,
            delegate,
        });
    }

    fn exit(&self) {
        let me = thread::current().id();
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(index) = holders.iter().position(|h| h.owner == me) {
            holders[index].depth -= 1;
            if holders[index].depth == 0 {
                holders.remove(index);
                self.released.notify_all();
            }
        }
    }

    /// True if the calling thread currently holds the gate.
    pub fn holds_current(&self) -> bool {
        let holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        let me = thread::current().id();
        holders.iter().any(|h| h.owner == me)
    }

    /// Blocks until recognition under `path` is admissible, then returns.
    ///
    /// Admission is immediate when no held target overlaps `path`, when the
    /// only overlapping holds belong to the caller, or when the caller runs
    /// on an overlapping holder's delegated worker queue.
    pub fn admit_recognition(&self, path: &Path) {
        let me = thread::current().id();
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            let blocked = holders.iter().any(|h| {
                h.owner != me
                    && !(h.delegate.is_some() && h.delegate == current_pool_tag())
                    && paths_overlap(path, &h.target)
            });

            if !blocked {
                return;
            }

            holders = self
                .released
                .wait(holders)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Two paths overlap when either is an ancestor of (or equal to) the other.
fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

struct GateGuard<'a>(&'a OperationGate);

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

/// Returns the deepest common ancestor of two absolute paths.
pub(crate) fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    let mut ancestor = PathBuf::new();
    for (ca, cb) in a.components().zip(b.components()) {
        if ca != cb {
            break;
        }
        ancestor.push(ca);
    }
    ancestor
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn gate_is_reentrant() {
        let gate = OperationGate::new();
        let ran = gate.run_atomic(Path::new("/a"), || {
            gate.run_atomic(Path::new("/a/b"), || {
                assert!(gate.holds_current());
                true
            })
        });
        assert!(ran);
        assert!(!gate.holds_current());
    }

    #[test]
    fn overlapping_recognition_waits_for_release() {
        let gate = Arc::new(OperationGate::new());
        let admitted = Arc::new(AtomicBool::new(false));

        let observer = gate.run_atomic(Path::new("/a"), || {
            let gate = Arc::clone(&gate);
            let admitted_in_observer = Arc::clone(&admitted);
            let observer = thread::spawn(move || {
                gate.admit_recognition(Path::new("/a/b/file.txt"));
                admitted_in_observer.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!admitted.load(Ordering::SeqCst));
            observer
        });

        observer.join().unwrap();
        assert!(admitted.load(Ordering::SeqCst));
    }

    #[test]
    fn disjoint_recognition_is_admitted_immediately() {
        let gate = Arc::new(OperationGate::new());

        gate.run_atomic(Path::new("/a/b"), || {
            let gate = Arc::clone(&gate);
            let observer = thread::spawn(move || {
                gate.admit_recognition(Path::new("/a/c/file.txt"));
            });
            observer.join().unwrap();
        });
    }

    #[test]
    fn disjoint_sections_run_concurrently() {
        let gate = Arc::new(OperationGate::new());
        let entered = Arc::new(AtomicBool::new(false));

        gate.run_atomic(Path::new("/root/P"), || {
            let gate = Arc::clone(&gate);
            let entered_in_other = Arc::clone(&entered);
            let other = thread::spawn(move || {
                gate.run_atomic(Path::new("/root/Q"), || {
                    entered_in_other.store(true, Ordering::SeqCst);
                });
            });
            other.join().unwrap();
            assert!(entered.load(Ordering::SeqCst));
        });
    }

    #[test]
    fn overlapping_sections_serialize() {
        let gate = Arc::new(OperationGate::new());
        let entered = Arc::new(AtomicBool::new(false));

        let other = gate.run_atomic(Path::new("/root/P"), || {
            let gate = Arc::clone(&gate);
            let entered_in_other = Arc::clone(&entered);
            let other = thread::spawn(move || {
                gate.run_atomic(Path::new("/root/P/sub"), || {
                    entered_in_other.store(true, Ordering::SeqCst);
                });
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!entered.load(Ordering::SeqCst));
            other
        });

        other.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn holder_is_admitted_under_its_own_target() {
        let gate = OperationGate::new();
        gate.run_atomic(Path::new("/a"), || {
            gate.admit_recognition(Path::new("/a/b"));
        });
    }

    #[test]
    fn common_ancestor_of_siblings_is_parent() {
        assert_eq!(
            common_ancestor(Path::new("/root/a/x"), Path::new("/root/b/y")),
            PathBuf::from("/root"),
        );
        assert_eq!(
            common_ancestor(Path::new("/root/a"), Path::new("/root/a/b")),
            PathBuf::from("/root/a"),
        );
    }
}
