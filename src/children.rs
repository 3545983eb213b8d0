//! Folder child lists.
//!
//! Each folder that anyone has asked about gets one [`FolderList`], which
//! owns the recognized children and keeps them alive while the folder is
//! materialized. Computation runs on the recognition queue; refresh requests
//! are coalesced by a sequence number, so a pass that finishes scanning
//! against an already-superseded request throws its result away and scans
//! again instead of publishing stale data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use indexmap::IndexMap;

use crate::events::{Event, PROP_CHILDREN};
use crate::object::{DataObject, ObjectCore};
use crate::order;
use crate::recognize;
use crate::session::Env;
use crate::worker::TaskHandle;

/// One list per folder path, created on demand.
pub(crate) struct FolderMap {
    lists: Mutex<HashMap<PathBuf, Arc<FolderList>>>,
}

impl FolderMap {
    pub fn new() -> Self {
        FolderMap {
            lists: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_folder(&self, path: &Path) -> Arc<FolderList> {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            lists
                .entry(path.to_owned())
                .or_insert_with(|| Arc::new(FolderList::new(path))),
        )
    }

    /// The list for `path`, if one was ever materialized.
    pub fn existing(&self, path: &Path) -> Option<Arc<FolderList>> {
        let lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists.get(path).cloned()
    }

    /// Forgets the lists at or under `prefix`. Used when a folder moves or
    /// disappears; later lookups start over with a fresh list.
    pub fn drop_subtree(&self, prefix: &Path) {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists.retain(|path, _| !path.starts_with(prefix));
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uncomputed,
    Ready,
}

type ChildrenCallback = Box<dyn FnOnce(&[DataObject]) + Send>;
pub type FilterListener = Box<dyn Fn(&[DataObject]) + Send + Sync>;

struct ListState {
    phase: Phase,

    /// Children keyed by primary path, in discovery order. Weak so a cache
    /// entry never outlives the registry's say on identity.
    cache: IndexMap<PathBuf, Weak<ObjectCore>>,

    /// The published, sorted child list. Strong: materialized children stay
    /// alive while their folder is.
    order: Vec<DataObject>,

    /// Bumped by every refresh request; a pass only publishes if its scan
    /// started at the current value.
    refresh_seq: u64,
    /// Bumped every time a pass publishes.
    applied_gen: u64,
    scheduled: bool,
    compute_handle: Option<TaskHandle>,

    reorder_seq: u64,
    reorder_prev: Option<TaskHandle>,

    waiters: Vec<ChildrenCallback>,
    filter: Option<FilterListener>,
}

pub(crate) struct FolderList {
    path: PathBuf,
    state: Mutex<ListState>,
    on_ready: Condvar,
}

struct ScanOutcome {
    cache: IndexMap<PathBuf, Weak<ObjectCore>>,
    order: Vec<DataObject>,
}

impl FolderList {
    fn new(path: &Path) -> Self {
        FolderList {
            path: path.to_owned(),
            state: Mutex::new(ListState {
                phase: Phase::Uncomputed,
                cache: IndexMap::new(),
                order: Vec::new(),
                refresh_seq: 0,
                applied_gen: 0,
                scheduled: false,
                compute_handle: None,
                reorder_seq: 0,
                reorder_prev: None,
                waiters: Vec::new(),
                filter: None,
            }),
            on_ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the current children, computing them first if this folder was
    /// never scanned. Once computed, reads are non-blocking even while a
    /// refresh or reorder is in flight; they see the old list until the new
    /// one is published.
    pub fn get_children(self: &Arc<Self>, env: &Arc<Env>) -> Vec<DataObject> {
        let mut state = self.lock();
        if state.phase == Phase::Ready {
            return state.order.clone();
        }

        // Inside an atomic section the queue could be arbitrarily far
        // behind; compute on the calling thread instead.
        if env.gate.holds_current() {
            drop(state);
            self.compute_pass(env);
            return self.lock().order.clone();
        }

        self.schedule(env, &mut state);
        while state.phase != Phase::Ready {
            state = self.on_ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.order.clone()
    }

    /// Runs `callback` with the children once they are known, without
    /// blocking the caller. An already-computed list answers immediately on
    /// the calling thread.
    pub fn compute_children_async(
        self: &Arc<Self>,
        env: &Arc<Env>,
        callback: impl FnOnce(&[DataObject]) + Send + 'static,
    ) -> TaskHandle {
        let mut state = self.lock();
        if state.phase == Phase::Ready {
            let order = state.order.clone();
            drop(state);
            callback(&order);
            return TaskHandle::finished();
        }

        state.waiters.push(Box::new(callback));
        self.schedule(env, &mut state)
    }

    /// Requests a rescan. Multiple requests while a pass is queued or
    /// scanning collapse into one final pass.
    pub fn refresh(self: &Arc<Self>, env: &Arc<Env>) -> TaskHandle {
        let mut state = self.lock();
        if state.phase == Phase::Uncomputed && !state.scheduled {
            // Nobody ever asked; nothing to keep fresh.
            return TaskHandle::finished();
        }
        state.refresh_seq += 1;
        self.schedule(env, &mut state)
    }

    /// Installs a listener that observes every published child list.
    pub fn set_filter(&self, filter: FilterListener) {
        self.lock().filter = Some(filter);
    }

    fn schedule(self: &Arc<Self>, env: &Arc<Env>, state: &mut ListState) -> TaskHandle {
        if state.scheduled {
            if let Some(handle) = &state.compute_handle {
                return handle.clone();
            }
        }
        state.scheduled = true;

        let list = Arc::clone(self);
        let env_clone = Arc::clone(env);
        let handle = env
            .recognition
            .post(move || list.compute_pass(&env_clone));
        state.compute_handle = Some(handle.clone());
        handle
    }

    /// One full recompute: scan, recognize, sort, publish. Loops if a
    /// refresh arrived while scanning, so the published list always matches
    /// the newest request.
    fn compute_pass(self: &Arc<Self>, env: &Arc<Env>) {
        loop {
            let (seq, old_cache) = {
                let state = self.lock();
                (state.refresh_seq, state.cache.clone())
            };

            env.gate.admit_recognition(&self.path);
            let outcome = self.scan(env, &old_cache);

            let mut state = self.lock();
            if state.refresh_seq != seq {
                continue;
            }

            let added: Vec<PathBuf> = outcome
                .cache
                .keys()
                .filter(|key| !state.cache.contains_key(*key))
                .cloned()
                .collect();
            let removed: Vec<PathBuf> = state
                .cache
                .keys()
                .filter(|key| !outcome.cache.contains_key(*key))
                .cloned()
                .collect();

            state.cache = outcome.cache;
            state.order = outcome.order;
            state.phase = Phase::Ready;
            state.applied_gen += 1;
            state.scheduled = false;
            state.compute_handle = None;

            let waiters = std::mem::take(&mut state.waiters);
            let published = state.order.clone();
            self.on_ready.notify_all();
            drop(state);

            for waiter in waiters {
                waiter(&published);
            }
            {
                let state = self.lock();
                if let Some(filter) = &state.filter {
                    filter(&published);
                }
            }
            if !added.is_empty() || !removed.is_empty() {
                env.notifier.post(Event::ChildrenChanged {
                    folder: self.path.clone(),
                    added,
                    removed,
                });
            }
            return;
        }
    }

    /// Enumerates the folder and recognizes each entry.
    ///
    /// Secondary files of an already-recognized child are skipped, and a
    /// probe that redirects to an existing primary dedupes against it, so
    /// every child appears exactly once no matter the enumeration order.
    fn scan(&self, env: &Arc<Env>, old_cache: &IndexMap<PathBuf, Weak<ObjectCore>>) -> ScanOutcome {
        let mut entries = Vec::new();
        for attempt in 0..2 {
            match read_entries(env, &self.path) {
                Ok(paths) => {
                    entries = paths;
                    break;
                }
                Err(err) if attempt == 0 => {
                    log::debug!(
                        "Enumerating {} failed ({}), retrying once",
                        self.path.display(),
                        err
                    );
                }
                Err(err) => {
                    log::warn!(
                        "Enumerating {} failed twice ({}), treating as empty",
                        self.path.display(),
                        err
                    );
                }
            }
        }

        let mut excluded = std::collections::HashSet::new();
        let mut cache = IndexMap::new();
        let mut children = Vec::new();

        for path in entries {
            if excluded.contains(&path) {
                continue;
            }

            let reused = old_cache
                .get(&path)
                .and_then(Weak::upgrade)
                .filter(|core| core.is_valid())
                .map(DataObject::from_core)
                .filter(|object| object.primary_path() == path);

            let object = match reused {
                Some(object) => object,
                None => match recognize::find_or_create(env, &path) {
                    Some(object) => object,
                    None => continue,
                },
            };

            for secondary in object.secondary_paths() {
                excluded.insert(secondary);
            }
            let primary = object.primary_path();
            if primary != path {
                excluded.insert(path);
            }
            if !cache.contains_key(&primary) {
                cache.insert(primary, object.downgrade());
                children.push(object);
            }
        }

        order::sort_children(&env.vfs, &self.path, &mut children);
        ScanOutcome {
            cache,
            order: children,
        }
    }

    /// Schedules a re-sort of the current list without rescanning. A reorder
    /// that is superseded before it publishes exits without firing anything.
    pub fn reorder(self: &Arc<Self>, env: &Arc<Env>) -> TaskHandle {
        let mut state = self.lock();
        state.reorder_seq += 1;
        let seq = state.reorder_seq;
        let prev = state.reorder_prev.take();

        let list = Arc::clone(self);
        let env_clone = Arc::clone(env);
        let handle = env.recognition.post(move || {
            if let Some(prev) = prev {
                prev.wait();
            }
            list.reorder_pass(&env_clone, seq);
        });
        state.reorder_prev = Some(handle.clone());
        handle
    }

    fn reorder_pass(&self, env: &Arc<Env>, seq: u64) {
        let (snapshot, base_gen) = {
            let state = self.lock();
            if state.reorder_seq != seq || state.phase != Phase::Ready {
                return;
            }
            (state.order.clone(), state.applied_gen)
        };

        env.gate.admit_recognition(&self.path);
        let mut sorted = snapshot;
        order::sort_children(&env.vfs, &self.path, &mut sorted);

        let mut state = self.lock();
        // A newer reorder or a full recompute owns the list now.
        if state.reorder_seq != seq || state.applied_gen != base_gen {
            return;
        }
        if sorted != state.order {
            state.order = sorted;
            drop(state);
            env.notifier.post(Event::Property {
                path: self.path.clone(),
                name: PROP_CHILDREN,
            });
        }
    }
}

fn read_entries(env: &Arc<Env>, path: &Path) -> std::io::Result<Vec<PathBuf>> {
    use resfs::IoResultExt;

    match env.vfs.read_dir(path).with_not_found()? {
        Some(read_dir) => {
            let mut paths = Vec::new();
            for entry in read_dir {
                paths.push(entry?.path().to_owned());
            }
            Ok(paths)
        }
        // The folder itself is gone; its list is empty.
        None => Ok(Vec::new()),
    }
}
