//! Data objects: the live, typed handles over files and folders.
//!
//! A [`DataObject`] is a cheap clone of a shared core. Identity is the core
//! allocation, not the path: two handles are equal exactly when they came
//! from the same recognition.
//!
//! Structural operations (rename, move, copy, delete) run inside the
//! operation gate over the smallest subtree that covers every touched path.
//! Filesystem steps are recorded in an undo log as they happen; if a later
//! step fails, the completed steps are unwound in reverse so observers see
//! either the whole operation or none of it.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use resfs::{IoResultExt, Vfs};
use thiserror::Error;

use crate::atomic::common_ancestor;
use crate::events::{
    Event, PROP_FILES, PROP_MODIFIED, PROP_NAME, PROP_PRIMARY_FILE, PROP_VALID,
};
use crate::folder::DataFolder;
use crate::order::{ATTR_ORDER, ATTR_SORT_MODE};
use crate::recognize::{self, LoaderId};
use crate::session::Env;
use crate::shadow::{self, DataShadow};

/// Attribute that marks an object as not movable, renamable, or deletable.
pub const ATTR_LOCKED: &str = "object.locked";
/// Attribute that marks an object as a template for
/// [`DataObject::create_from_template`].
pub const ATTR_TEMPLATE: &str = "object.template";

#[derive(Debug, Error)]
pub enum OpError {
    #[error("the object at {path} is no longer valid")]
    Invalid { path: PathBuf },

    #[error("the session backing this object has shut down")]
    SessionClosed,

    #[error("invalidation of {path} was vetoed")]
    Vetoed { path: PathBuf },

    #[error("{path} does not allow {op}")]
    NotAllowed { op: &'static str, path: PathBuf },

    #[error("could not {op} {path}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not a folder")]
    NotAFolder { path: PathBuf },

    #[error("{path} is not a shadow")]
    NotAShadow { path: PathBuf },

    #[error("nothing was recognized at {path}")]
    Unrecognized { path: PathBuf },
}

fn io_err(op: &'static str, path: &Path, source: io::Error) -> OpError {
    OpError::Io {
        op,
        path: path.to_owned(),
        source,
    }
}

fn already_exists(op: &'static str, path: &Path) -> OpError {
    io_err(
        op,
        path,
        io::Error::new(io::ErrorKind::AlreadyExists, "target already exists"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    File,
    Folder,
    Shadow,
}

struct FilePaths {
    primary: PathBuf,
    secondaries: BTreeSet<PathBuf>,
}

type VetoListener = Box<dyn Fn(&DataObject) -> bool + Send + Sync>;

pub(crate) struct ObjectCore {
    env: Weak<Env>,
    kind: ObjectKind,
    loader: LoaderId,
    paths: Mutex<FilePaths>,
    valid: AtomicBool,
    modified: AtomicBool,
    item_seq: AtomicU64,
    vetoers: Mutex<Vec<VetoListener>>,
}

impl ObjectCore {
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn mark_invalid(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn set_item_seq(&self, seq: u64) {
        self.item_seq.store(seq, Ordering::SeqCst);
    }

    fn paths(&self) -> std::sync::MutexGuard<'_, FilePaths> {
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rewrites this object's paths after its primary moved from `old` to
    /// `new`, and stamps the new incarnation number.
    pub fn rebase(&self, old: &Path, new: &Path, seq: u64) {
        let mut paths = self.paths();
        if let Ok(suffix) = paths.primary.strip_prefix(old) {
            paths.primary = new.join(suffix);
        }
        paths.secondaries = paths
            .secondaries
            .iter()
            .map(|sec| match sec.strip_prefix(old) {
                Ok(suffix) => new.join(suffix),
                Err(_) => sec.clone(),
            })
            .collect();
        self.set_item_seq(seq);
    }
}

/// A live handle to the object recognized at some primary path.
#[derive(Clone)]
pub struct DataObject {
    core: Arc<ObjectCore>,
}

impl PartialEq for DataObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for DataObject {}

impl std::fmt::Debug for DataObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataObject")
            .field("primary", &self.primary_path())
            .field("kind", &self.kind())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl DataObject {
    pub(crate) fn new(
        env: &Arc<Env>,
        kind: ObjectKind,
        loader: LoaderId,
        primary: PathBuf,
        secondaries: Vec<PathBuf>,
    ) -> Self {
        DataObject {
            core: Arc::new(ObjectCore {
                env: Arc::downgrade(env),
                kind,
                loader,
                paths: Mutex::new(FilePaths {
                    primary,
                    secondaries: secondaries.into_iter().collect(),
                }),
                valid: AtomicBool::new(true),
                modified: AtomicBool::new(false),
                item_seq: AtomicU64::new(0),
                vetoers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_core(core: Arc<ObjectCore>) -> Self {
        DataObject { core }
    }

    pub(crate) fn core(&self) -> &Arc<ObjectCore> {
        &self.core
    }

    pub(crate) fn downgrade(&self) -> Weak<ObjectCore> {
        Arc::downgrade(&self.core)
    }

    fn env(&self) -> Result<Arc<Env>, OpError> {
        self.core.env.upgrade().ok_or(OpError::SessionClosed)
    }

    pub(crate) fn session_env(&self) -> Result<Arc<Env>, OpError> {
        self.env()
    }

    fn ensure_valid(&self) -> Result<(), OpError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(OpError::Invalid {
                path: self.primary_path(),
            })
        }
    }

    fn ensure_unlocked(&self, vfs: &Vfs, op: &'static str) -> Result<(), OpError> {
        let primary = self.primary_path();
        if is_locked(vfs, &primary) {
            return Err(OpError::NotAllowed { op, path: primary });
        }
        Ok(())
    }

    pub fn kind(&self) -> ObjectKind {
        self.core.kind
    }

    pub fn loader(&self) -> LoaderId {
        self.core.loader
    }

    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    pub fn primary_path(&self) -> PathBuf {
        self.core.paths().primary.clone()
    }

    /// All files making up this object: the primary first, then the
    /// secondaries in path order.
    pub fn files(&self) -> Vec<PathBuf> {
        let paths = self.core.paths();
        let mut files = vec![paths.primary.clone()];
        files.extend(paths.secondaries.iter().cloned());
        files
    }

    pub(crate) fn secondary_paths(&self) -> Vec<PathBuf> {
        self.core.paths().secondaries.iter().cloned().collect()
    }

    /// The primary file's name without its extension.
    pub fn name(&self) -> String {
        let paths = self.core.paths();
        paths
            .primary
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The primary file's full name, extension included.
    pub fn file_name(&self) -> String {
        let paths = self.core.paths();
        paths
            .primary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_modified(&self) -> bool {
        self.core.modified.load(Ordering::SeqCst)
    }

    /// Flags unsaved in-memory changes. A modified object refuses
    /// invalidation until the flag is cleared.
    pub fn set_modified(&self, modified: bool) -> Result<(), OpError> {
        let env = self.env()?;
        if self.core.modified.swap(modified, Ordering::SeqCst) != modified {
            env.notifier.post(Event::Property {
                path: self.primary_path(),
                name: PROP_MODIFIED,
            });
        }
        Ok(())
    }

    pub fn is_template(&self) -> bool {
        match self.env() {
            Ok(env) => matches!(
                env.vfs.get_attr(self.primary_path(), ATTR_TEMPLATE),
                Ok(Some(_))
            ),
            Err(_) => false,
        }
    }

    pub fn set_template(&self, template: bool) -> Result<(), OpError> {
        let env = self.env()?;
        let primary = self.primary_path();
        let value = template.then_some("true");
        env.vfs
            .set_attr(&primary, ATTR_TEMPLATE, value)
            .map_err(|err| io_err("mark as template", &primary, err))
    }

    /// Registers a listener consulted before this object is invalidated in
    /// place (loader change or revalidation). Returning `true` vetoes.
    pub fn add_veto_listener(&self, listener: impl Fn(&DataObject) -> bool + Send + Sync + 'static) {
        self.core
            .vetoers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    /// Asks this object to give up its path. Refused if the object carries
    /// unsaved changes or any veto listener objects; on success the object
    /// is invalid and deregistered, and its parent folder is refreshed.
    pub(crate) fn request_invalidate(&self) -> Result<(), OpError> {
        if !self.is_valid() {
            return Ok(());
        }
        if self.is_modified() {
            return Err(OpError::Vetoed {
                path: self.primary_path(),
            });
        }
        {
            let vetoers = self.core.vetoers.lock().unwrap_or_else(|e| e.into_inner());
            if vetoers.iter().any(|veto| veto(self)) {
                return Err(OpError::Vetoed {
                    path: self.primary_path(),
                });
            }
        }

        self.dispose();
        Ok(())
    }

    /// Invalidates unconditionally: the backing files are gone or the path
    /// now belongs to someone else.
    pub(crate) fn dispose(&self) {
        if !self.is_valid() {
            return;
        }
        self.core.mark_invalid();

        if let Ok(env) = self.env() {
            let primary = self.primary_path();
            env.registry
                .deregister(&primary, self.core.item_seq.load(Ordering::SeqCst));
            env.notifier.post(Event::Property {
                path: primary.clone(),
                name: PROP_VALID,
            });
            if let Some(parent) = primary.parent() {
                env.refresh_folder(parent);
            }
        }
    }

    /// Renames the primary file in place, keeping its extension. Secondary
    /// files sharing the old stem follow along.
    pub fn rename(&self, new_name: &str) -> Result<(), OpError> {
        let env = self.env()?;
        self.ensure_valid()?;

        let old_primary = self.primary_path();
        let parent = match old_primary.parent() {
            Some(parent) => parent.to_owned(),
            None => {
                return Err(OpError::NotAllowed {
                    op: "rename",
                    path: old_primary,
                })
            }
        };

        env.gate
            .run_atomic(&parent, || {
                self.ensure_unlocked(&env.vfs, "rename")?;

                let new_file = match (self.kind(), old_primary.extension()) {
                    (ObjectKind::File | ObjectKind::Shadow, Some(ext)) => {
                        format!("{new_name}.{}", ext.to_string_lossy())
                    }
                    _ => new_name.to_owned(),
                };
                let new_primary = parent.join(&new_file);
                if new_primary == old_primary {
                    return Ok(());
                }
                if env.vfs.exists(&new_primary).unwrap_or(false) {
                    return Err(already_exists("rename", &new_primary));
                }

                let mut undo = UndoLog::new(&env.vfs);
                undo.rename(&old_primary, &new_primary)
                    .map_err(|err| io_err("rename", &old_primary, err))?;

                // Secondaries with the old stem take the new one.
                let old_stem = old_primary.file_stem().map(|s| s.to_os_string());
                let mut new_secondaries = BTreeSet::new();
                for sec in self.secondary_paths() {
                    let follows = sec.parent() == Some(parent.as_path())
                        && sec.file_stem().map(|s| s.to_os_string()) == old_stem;
                    if !follows {
                        new_secondaries.insert(sec);
                        continue;
                    }
                    let new_sec = match sec.extension() {
                        Some(ext) => parent.join(format!("{new_name}.{}", ext.to_string_lossy())),
                        None => parent.join(new_name),
                    };
                    if let Err(err) = undo.rename(&sec, &new_sec) {
                        undo.rollback();
                        return Err(io_err("rename", &sec, err));
                    }
                    new_secondaries.insert(new_sec);
                }
                undo.commit();

                env.registry.rekey_prefix(&old_primary, &new_primary);
                self.core.paths().secondaries = new_secondaries;

                shadow::on_target_moved(&env, &old_primary, &new_primary);

                for prop in [PROP_NAME, PROP_PRIMARY_FILE, PROP_FILES] {
                    env.notifier.post(Event::Property {
                        path: new_primary.clone(),
                        name: prop,
                    });
                }
                env.refresh_folder(&parent);
                Ok(())
            })
    }

    /// Moves this object into `dest`. Folder moves go child by child so a
    /// locked descendant aborts the move with everything restored.
    pub fn move_to(&self, dest: &DataFolder) -> Result<(), OpError> {
        let env = self.env()?;
        self.ensure_valid()?;

        let old_primary = self.primary_path();
        let src_parent = match old_primary.parent() {
            Some(parent) => parent.to_owned(),
            None => {
                return Err(OpError::NotAllowed {
                    op: "move",
                    path: old_primary,
                })
            }
        };
        let dest_dir = dest.path();
        // A folder cannot be moved into its own subtree.
        if dest_dir.starts_with(&old_primary) {
            return Err(OpError::NotAllowed {
                op: "move",
                path: old_primary,
            });
        }
        let target = dest_dir.join(self.file_name());
        let scope = common_ancestor(&src_parent, &dest_dir);

        env.gate
            .run_atomic(&scope, || {
                self.ensure_unlocked(&env.vfs, "move")?;
                if env.vfs.exists(&target).unwrap_or(false) {
                    return Err(already_exists("move", &target));
                }

                let mut undo = UndoLog::new(&env.vfs);
                let moved = if self.kind() == ObjectKind::Folder {
                    move_folder(&env.vfs, &old_primary, &target, &mut undo)
                } else {
                    move_file_group(self, &dest_dir, &mut undo)
                };
                if let Err(err) = moved {
                    undo.rollback();
                    return Err(err);
                }
                undo.commit();

                env.registry.rekey_prefix(&old_primary, &target);

                // Secondaries moved next to the primary.
                {
                    let mut paths = self.core.paths();
                    paths.secondaries = paths
                        .secondaries
                        .iter()
                        .map(|sec| {
                            if sec.parent() == Some(src_parent.as_path()) {
                                dest_dir.join(sec.file_name().unwrap_or_default())
                            } else {
                                sec.clone()
                            }
                        })
                        .collect();
                }

                shadow::on_target_moved(&env, &old_primary, &target);

                for prop in [PROP_PRIMARY_FILE, PROP_FILES] {
                    env.notifier.post(Event::Property {
                        path: target.clone(),
                        name: prop,
                    });
                }
                env.refresh_folder(&src_parent);
                env.refresh_folder(&dest_dir);
                Ok(())
            })
    }

    /// Copies this object into `dest` and returns the object recognized from
    /// the copy.
    pub fn copy_to(&self, dest: &DataFolder) -> Result<DataObject, OpError> {
        let env = self.env()?;
        self.ensure_valid()?;

        let src_primary = self.primary_path();
        let dest_dir = dest.path();
        // Copying a folder into its own subtree would recurse into the copy.
        if dest_dir.starts_with(&src_primary) {
            return Err(OpError::NotAllowed {
                op: "copy",
                path: src_primary,
            });
        }
        let target = dest_dir.join(self.file_name());
        let scope = common_ancestor(&src_primary, &dest_dir);

        env.gate
            .run_atomic(&scope, || {
                if env.vfs.exists(&target).unwrap_or(false) {
                    return Err(already_exists("copy", &target));
                }

                let mut undo = UndoLog::new(&env.vfs);
                let copied = if self.kind() == ObjectKind::Folder {
                    copy_tree(&env.vfs, &src_primary, &target, &mut undo)
                } else {
                    copy_file_group(&env.vfs, self, &dest_dir, &mut undo)
                };
                if let Err(err) = copied {
                    undo.rollback();
                    return Err(err);
                }
                undo.commit();

                env.refresh_folder(&dest_dir);
                recognize::find_or_create(&env, &target)
                    .ok_or(OpError::Unrecognized { path: target })
            })
    }

    /// Deletes this object's files and invalidates every object they backed.
    pub fn delete(&self) -> Result<(), OpError> {
        let env = self.env()?;
        self.ensure_valid()?;

        let primary = self.primary_path();
        let parent = primary.parent().map(Path::to_owned);
        let scope = parent.clone().unwrap_or_else(|| primary.clone());

        env.gate
            .run_atomic(&scope, || {
                self.ensure_unlocked(&env.vfs, "delete")?;
                if self.kind() == ObjectKind::Folder {
                    ensure_tree_unlocked(&env.vfs, &primary, "delete")?;
                    env.vfs
                        .remove_dir_all(&primary)
                        .map_err(|err| io_err("delete", &primary, err))?;
                } else {
                    env.vfs
                        .remove_file(&primary)
                        .map_err(|err| io_err("delete", &primary, err))?;
                    for sec in self.secondary_paths() {
                        env.vfs
                            .remove_file(&sec)
                            .with_not_found()
                            .map_err(|err| io_err("delete", &sec, err))?;
                    }
                }

                env.registry.dispose_subtree(&primary, &env.notifier);
                shadow::on_target_removed(&env, &primary);

                if let Some(parent) = &parent {
                    env.refresh_folder(parent);
                }
                Ok(())
            })
    }

    /// Creates a shadow of this object inside `folder` and returns it.
    pub fn create_shadow(&self, folder: &DataFolder) -> Result<DataShadow, OpError> {
        let env = self.env()?;
        self.ensure_valid()?;

        let primary = self.primary_path();
        let dest_dir = folder.path();
        let shadow_path = dest_dir.join(format!("{}.{}", self.name(), shadow::SHADOW_EXT));

        env.gate
            .run_atomic(&dest_dir, || {
                if env.vfs.exists(&shadow_path).unwrap_or(false) {
                    return Err(already_exists("shadow", &shadow_path));
                }
                env.vfs
                    .write(&shadow_path, primary.to_string_lossy().as_bytes())
                    .map_err(|err| io_err("shadow", &shadow_path, err))?;

                env.refresh_folder(&dest_dir);
                let object = recognize::find_or_create(&env, &shadow_path).ok_or(
                    OpError::Unrecognized {
                        path: shadow_path.clone(),
                    },
                )?;
                DataShadow::try_from(object)
            })
    }

    /// Instantiates this template into `dest` under `name`. The copy loses
    /// the template marking.
    pub fn create_from_template(
        &self,
        dest: &DataFolder,
        name: &str,
    ) -> Result<DataObject, OpError> {
        let env = self.env()?;
        self.ensure_valid()?;

        let src_primary = self.primary_path();
        let dest_dir = dest.path();
        let target_file = match src_primary.extension() {
            Some(ext) => format!("{name}.{}", ext.to_string_lossy()),
            None => name.to_owned(),
        };
        let target = dest_dir.join(&target_file);
        let scope = common_ancestor(&src_primary, &dest_dir);

        env.gate
            .run_atomic(&scope, || {
                if env.vfs.exists(&target).unwrap_or(false) {
                    return Err(already_exists("instantiate", &target));
                }

                let mut undo = UndoLog::new(&env.vfs);
                let copied = (|| -> Result<(), OpError> {
                    copy_file(&env.vfs, &src_primary, &target, &mut undo)?;
                    for sec in self.secondary_paths() {
                        let sec_name = match sec.extension() {
                            Some(ext) => format!("{name}.{}", ext.to_string_lossy()),
                            None => name.to_owned(),
                        };
                        copy_file(&env.vfs, &sec, &dest_dir.join(sec_name), &mut undo)?;
                    }
                    Ok(())
                })();
                if let Err(err) = copied {
                    undo.rollback();
                    return Err(err);
                }
                undo.commit();

                // Instances are ordinary objects, not templates.
                env.vfs
                    .set_attr(&target, ATTR_TEMPLATE, None)
                    .map_err(|err| io_err("instantiate", &target, err))?;

                env.refresh_folder(&dest_dir);
                recognize::find_or_create(&env, &target)
                    .ok_or(OpError::Unrecognized { path: target })
            })
    }
}

pub(crate) fn is_locked(vfs: &Vfs, path: &Path) -> bool {
    matches!(vfs.get_attr(path, ATTR_LOCKED), Ok(Some(_)))
}

fn ensure_tree_unlocked(vfs: &Vfs, root: &Path, op: &'static str) -> Result<(), OpError> {
    let entries = vfs
        .read_dir(root)
        .map_err(|err| io_err(op, root, err))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|err| io_err(op, root, err))?;

    for entry in entries {
        let path = entry.path();
        if is_locked(vfs, path) {
            return Err(OpError::NotAllowed {
                op,
                path: path.to_owned(),
            });
        }
        let meta = vfs
            .metadata(path)
            .map_err(|err| io_err(op, path, err))?;
        if meta.is_dir() {
            ensure_tree_unlocked(vfs, path, op)?;
        }
    }
    Ok(())
}

/// Moves a folder by creating the destination and renaming each child into
/// it. Locked descendants are checked up front per child, so a refusal
/// arrives before that child moves.
fn move_folder(vfs: &Vfs, src: &Path, dest: &Path, undo: &mut UndoLog<'_>) -> Result<(), OpError> {
    undo.create_dir(dest).map_err(|err| io_err("move", dest, err))?;
    copy_known_attrs(vfs, src, dest);

    let entries = vfs
        .read_dir(src)
        .map_err(|err| io_err("move", src, err))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|err| io_err("move", src, err))?;

    for entry in entries {
        let child = entry.path();
        if is_locked(vfs, child) {
            return Err(OpError::NotAllowed {
                op: "move",
                path: child.to_owned(),
            });
        }
        let meta = vfs.metadata(child).map_err(|err| io_err("move", child, err))?;
        if meta.is_dir() {
            ensure_tree_unlocked(vfs, child, "move")?;
        }

        let child_dest = dest.join(child.file_name().unwrap_or_default());
        undo.rename(child, &child_dest)
            .map_err(|err| io_err("move", child, err))?;
    }

    undo.remove_empty_dir(src)
        .map_err(|err| io_err("move", src, err))?;
    Ok(())
}

fn move_file_group(
    object: &DataObject,
    dest_dir: &Path,
    undo: &mut UndoLog<'_>,
) -> Result<(), OpError> {
    let primary = object.primary_path();
    let src_parent = primary.parent().map(Path::to_owned);

    undo.rename(&primary, &dest_dir.join(object.file_name()))
        .map_err(|err| io_err("move", &primary, err))?;

    for sec in object.secondary_paths() {
        if sec.parent().map(Path::to_owned) != src_parent {
            continue;
        }
        let sec_dest = dest_dir.join(sec.file_name().unwrap_or_default());
        undo.rename(&sec, &sec_dest)
            .map_err(|err| io_err("move", &sec, err))?;
    }
    Ok(())
}

fn copy_file(vfs: &Vfs, src: &Path, dest: &Path, undo: &mut UndoLog<'_>) -> Result<(), OpError> {
    let contents = vfs.read(src).map_err(|err| io_err("copy", src, err))?;
    undo.write(dest, contents.as_slice())
        .map_err(|err| io_err("copy", dest, err))?;
    copy_known_attrs(vfs, src, dest);
    Ok(())
}

fn copy_file_group(
    vfs: &Vfs,
    object: &DataObject,
    dest_dir: &Path,
    undo: &mut UndoLog<'_>,
) -> Result<(), OpError> {
    copy_file(
        vfs,
        &object.primary_path(),
        &dest_dir.join(object.file_name()),
        undo,
    )?;
    for sec in object.secondary_paths() {
        let sec_dest = dest_dir.join(sec.file_name().unwrap_or_default());
        copy_file(vfs, &sec, &sec_dest, undo)?;
    }
    Ok(())
}

fn copy_tree(vfs: &Vfs, src: &Path, dest: &Path, undo: &mut UndoLog<'_>) -> Result<(), OpError> {
    undo.create_dir(dest).map_err(|err| io_err("copy", dest, err))?;
    copy_known_attrs(vfs, src, dest);

    let entries = vfs
        .read_dir(src)
        .map_err(|err| io_err("copy", src, err))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|err| io_err("copy", src, err))?;

    for entry in entries {
        let child = entry.path();
        let child_dest = dest.join(child.file_name().unwrap_or_default());
        let meta = vfs.metadata(child).map_err(|err| io_err("copy", child, err))?;
        if meta.is_dir() {
            copy_tree(vfs, child, &child_dest, undo)?;
        } else {
            copy_file(vfs, child, &child_dest, undo)?;
        }
    }
    Ok(())
}

/// Carries the ordering and template attributes to a new location. The lock
/// attribute stays behind: a copy of a locked object is not itself locked.
fn copy_known_attrs(vfs: &Vfs, from: &Path, to: &Path) {
    for key in [ATTR_SORT_MODE, ATTR_ORDER, ATTR_TEMPLATE] {
        if let Ok(Some(value)) = vfs.get_attr(from, key) {
            if let Err(err) = vfs.set_attr(to, key, Some(&value)) {
                log::warn!("Could not carry attribute {key} to {}: {err}", to.display());
            }
        }
    }
}

/// Records completed filesystem steps so a failed operation can be unwound
/// in reverse.
struct UndoLog<'a> {
    vfs: &'a Vfs,
    steps: Vec<UndoStep>,
}

enum UndoStep {
    Rename { from: PathBuf, to: PathBuf },
    RemoveFile(PathBuf),
    RemoveDir(PathBuf),
    CreateDir(PathBuf),
}

impl<'a> UndoLog<'a> {
    fn new(vfs: &'a Vfs) -> Self {
        UndoLog {
            vfs,
            steps: Vec::new(),
        }
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        self.vfs.rename(from, to)?;
        self.steps.push(UndoStep::Rename {
            from: to.to_owned(),
            to: from.to_owned(),
        });
        Ok(())
    }

    fn create_dir(&mut self, path: &Path) -> io::Result<()> {
        self.vfs.create_dir(path)?;
        self.steps.push(UndoStep::RemoveDir(path.to_owned()));
        Ok(())
    }

    fn remove_empty_dir(&mut self, path: &Path) -> io::Result<()> {
        self.vfs.remove_dir_all(path)?;
        self.steps.push(UndoStep::CreateDir(path.to_owned()));
        Ok(())
    }

    fn write(&mut self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.vfs.write(path, contents)?;
        self.steps.push(UndoStep::RemoveFile(path.to_owned()));
        Ok(())
    }

    fn commit(mut self) {
        self.steps.clear();
    }

    fn rollback(mut self) {
        for step in self.steps.drain(..).rev() {
            let undone = match step {
                UndoStep::Rename { from, to } => self.vfs.rename(&from, &to),
                UndoStep::RemoveFile(path) => self.vfs.remove_file(&path),
                UndoStep::RemoveDir(path) => self.vfs.remove_dir_all(&path),
                UndoStep::CreateDir(path) => self.vfs.create_dir(&path),
            };
            if let Err(err) = undone {
                log::error!("Rollback step failed: {err}");
            }
        }
    }
}
