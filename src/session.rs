//! The session: owns every shared service and pumps filesystem events.
//!
//! [`Session::new`] wires the registry, recognizer chain, operation gate,
//! folder lists, and worker queues together behind one [`Env`], spawns the
//! event pump, and hands out the public API. Dropping the session shuts the
//! pump down and joins every worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{select, Sender};
use resfs::{Vfs, VfsEvent};

use crate::atomic::OperationGate;
use crate::children::FolderMap;
use crate::events::{Event, Notifier, PROP_FILES, PROP_NAME, PROP_PRIMARY_FILE};
use crate::folder::DataFolder;
use crate::object::{DataObject, ObjectKind, OpError};
use crate::recognize::{self, RecognizerChain};
use crate::registry::Registry;
use crate::revalidate::Revalidator;
use crate::shadow::{self, DataShadow, ShadowIndex};
use crate::worker::WorkQueue;

/// The worker queue recognition runs on. Atomic sections delegate their
/// admission to it so child lists can be computed on the section's behalf.
pub(crate) const RECOGNITION_POOL: &str = "arbor-recognition";
pub(crate) const REVALIDATION_POOL: &str = "arbor-revalidation";

/// Everything the live objects share. Objects hold this weakly; the session
/// (and the pump thread) hold it strongly.
pub(crate) struct Env {
    pub vfs: Arc<Vfs>,
    pub registry: Registry,
    pub chain: RecognizerChain,
    pub gate: OperationGate,
    pub folders: FolderMap,
    pub notifier: Notifier,
    pub shadows: ShadowIndex,
    pub recognition: WorkQueue,
    pub revalidation: WorkQueue,
    pub revalidator: Revalidator,
}

impl Env {
    /// Schedules a refresh of the folder list at `path`, if anyone ever
    /// materialized it.
    pub fn refresh_folder(self: &Arc<Self>, path: &Path) {
        if let Some(list) = self.folders.existing(path) {
            list.refresh(self);
        }
    }
}

pub struct Session {
    env: Arc<Env>,
    shutdown: Sender<()>,
    _pump: jod_thread::JoinHandle<()>,
}

impl Session {
    /// Opens a session over `vfs` with the standard recognizer chain.
    pub fn new(vfs: Vfs) -> Session {
        Session::with_chain(vfs, RecognizerChain::standard())
    }

    pub fn with_chain(vfs: Vfs, chain: RecognizerChain) -> Session {
        let vfs_events = vfs.event_receiver();
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(1);

        let env = Arc::new(Env {
            vfs: Arc::new(vfs),
            registry: Registry::new(),
            chain,
            gate: OperationGate::new(),
            folders: FolderMap::new(),
            notifier: Notifier::new(),
            shadows: ShadowIndex::new(),
            recognition: WorkQueue::new(RECOGNITION_POOL),
            revalidation: WorkQueue::new(REVALIDATION_POOL),
            revalidator: Revalidator::new(),
        });

        let pump_env = Arc::clone(&env);
        let pump = jod_thread::Builder::new()
            .name("arbor-events".to_owned())
            .spawn(move || loop {
                select! {
                    recv(vfs_events) -> event => {
                        match event {
                            Ok(event) => handle_vfs_event(&pump_env, event),
                            Err(_) => break,
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            })
            .unwrap_or_else(|err| panic!("could not spawn event pump: {err}"));

        Session {
            env,
            shutdown,
            _pump: pump,
        }
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.env.vfs
    }

    /// Looks up the object registered at `path` without recognizing anything
    /// new.
    pub fn find(&self, path: &Path) -> Option<DataObject> {
        self.env.registry.find(path)
    }

    /// Resolves `path` to its object, recognizing it on first sight.
    pub fn find_or_recognize(&self, path: &Path) -> Option<DataObject> {
        recognize::find_or_create(&self.env, path)
    }

    /// Resolves `path` and requires it to be a folder.
    pub fn folder(&self, path: &Path) -> Result<DataFolder, OpError> {
        let object = self
            .find_or_recognize(path)
            .ok_or_else(|| OpError::Unrecognized {
                path: path.to_owned(),
            })?;
        DataFolder::try_from(object)
    }

    /// Resolves `path` and requires it to be a shadow.
    pub fn shadow(&self, path: &Path) -> Result<DataShadow, OpError> {
        let object = self
            .find_or_recognize(path)
            .ok_or_else(|| OpError::Unrecognized {
                path: path.to_owned(),
            })?;
        DataShadow::try_from(object)
    }

    /// Runs `f` as an atomic section over `target`. Observers of the
    /// subtree wait until `f` returns; nested sections on the same thread
    /// extend the outer one.
    pub fn run_atomic<T>(&self, target: &Path, f: impl FnOnce() -> T) -> T {
        self.env.gate.run_atomic(target, f)
    }

    /// Like [`run_atomic`](Self::run_atomic), but recognition queued on the
    /// session's behalf stays admitted under the held target while the
    /// section runs.
    pub fn run_atomic_delegating<T>(&self, target: &Path, f: impl FnOnce() -> T) -> T {
        self.env
            .gate
            .run_atomic_delegating(target, RECOGNITION_POOL, f)
    }

    /// Re-runs recognition over the objects at `paths` and returns the
    /// objects that vetoed being replaced.
    ///
    /// Callable from inside an atomic section: the revalidation worker is
    /// admitted on the caller's behalf while this waits.
    pub fn revalidate(&self, paths: impl IntoIterator<Item = PathBuf>) -> Vec<DataObject> {
        self.env.gate.with_delegate(REVALIDATION_POOL, || {
            self.env.revalidator.revalidate(&self.env, paths)
        })
    }

    /// Subscribes to every event the session fires. Creation events arrive
    /// on the constructing thread before the object is findable; everything
    /// else arrives asynchronously, in posting order.
    pub fn subscribe(&self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.env.notifier.subscribe(listener);
    }

    /// Drops registry entries whose objects have been collected.
    pub fn reclaim(&self) {
        self.env.registry.reclaim();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Applies one backend event to the model. Waits for the operation gate
/// first, so external changes never interleave with an atomic section on
/// the same subtree. Changes the model already applied itself (because an
/// operation caused the event) reduce to no-ops here.
fn handle_vfs_event(env: &Arc<Env>, event: VfsEvent) {
    log::trace!("Filesystem event: {event:?}");

    match event {
        VfsEvent::Create(path) => {
            env.gate.admit_recognition(&path);
            if let Some(parent) = path.parent() {
                env.refresh_folder(parent);
            }
        }
        VfsEvent::Write(path) => {
            env.gate.admit_recognition(&path);
            if let Some(object) = env.registry.find(&path) {
                if object.kind() == ObjectKind::Shadow {
                    shadow::index_shadow(env, &object);
                }
                env.notifier.post(Event::Property {
                    path,
                    name: PROP_FILES,
                });
            }
        }
        VfsEvent::Remove(path) => {
            env.gate.admit_recognition(&path);
            env.registry.dispose_subtree(&path, &env.notifier);
            shadow::on_target_removed(env, &path);
            env.folders.drop_subtree(&path);
            if let Some(parent) = path.parent() {
                env.refresh_folder(parent);
            }
        }
        VfsEvent::Rename { from, to } => {
            env.gate.admit_recognition(&from);
            env.gate.admit_recognition(&to);

            env.registry.rekey_prefix(&from, &to);
            shadow::on_target_moved(env, &from, &to);
            env.folders.drop_subtree(&from);

            if env.registry.find(&to).is_some() {
                for prop in [PROP_NAME, PROP_PRIMARY_FILE, PROP_FILES] {
                    env.notifier.post(Event::Property {
                        path: to.clone(),
                        name: prop,
                    });
                }
            }
            if let Some(parent) = from.parent() {
                env.refresh_folder(parent);
            }
            if let Some(parent) = to.parent() {
                env.refresh_folder(parent);
            }
        }
        other => {
            log::debug!("Ignoring unhandled filesystem event: {other:?}");
        }
    }
}
