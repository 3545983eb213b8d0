//! Shadows: small files that point at another object by path.
//!
//! A `.shadow` file's contents are the target's primary path. The session
//! keeps an index from target paths to the shadows pointing at them so that
//! moving a target rewrites its shadows and deleting a target invalidates
//! them.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::object::{DataObject, ObjectKind, OpError};
use crate::recognize;
use crate::session::Env;

pub const SHADOW_EXT: &str = "shadow";

/// A recognized shadow. Wraps the underlying object; conversion fails for
/// anything that is not shadow-kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataShadow {
    object: DataObject,
}

impl TryFrom<DataObject> for DataShadow {
    type Error = OpError;

    fn try_from(object: DataObject) -> Result<Self, OpError> {
        if object.kind() == ObjectKind::Shadow {
            Ok(DataShadow { object })
        } else {
            Err(OpError::NotAShadow {
                path: object.primary_path(),
            })
        }
    }
}

impl DataShadow {
    pub fn as_object(&self) -> &DataObject {
        &self.object
    }

    pub fn into_object(self) -> DataObject {
        self.object
    }

    pub fn path(&self) -> PathBuf {
        self.object.primary_path()
    }

    /// The path this shadow points at, as stored in the file.
    pub fn target_path(&self) -> Result<PathBuf, OpError> {
        let env = self.object.session_env()?;
        let path = self.path();
        let contents = env.vfs.read_to_string(&path).map_err(|err| OpError::Io {
            op: "resolve shadow",
            path: path.clone(),
            source: err,
        })?;
        Ok(PathBuf::from(contents.trim()))
    }

    /// Resolves the target object. A broken link yields `Ok(None)`.
    pub fn target(&self) -> Result<Option<DataObject>, OpError> {
        let env = self.object.session_env()?;
        let target = self.target_path()?;
        Ok(recognize::find_or_create(&env, &target))
    }
}

/// Maps target paths to the shadow files pointing at them.
pub(crate) struct ShadowIndex {
    by_target: Mutex<HashMap<PathBuf, BTreeSet<PathBuf>>>,
}

impl ShadowIndex {
    pub fn new() -> Self {
        ShadowIndex {
            by_target: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, target: &Path, shadow: &Path) {
        let mut index = self.by_target.lock().unwrap_or_else(|e| e.into_inner());
        index
            .entry(target.to_owned())
            .or_default()
            .insert(shadow.to_owned());
    }

    /// Drops every entry for `shadow`, wherever it points. Used before
    /// reindexing a rewritten shadow file.
    pub fn forget(&self, shadow: &Path) {
        let mut index = self.by_target.lock().unwrap_or_else(|e| e.into_inner());
        for shadows in index.values_mut() {
            shadows.remove(shadow);
        }
        index.retain(|_, shadows| !shadows.is_empty());
    }

    fn take_targets_under(&self, prefix: &Path) -> Vec<(PathBuf, BTreeSet<PathBuf>)> {
        let mut index = self.by_target.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<PathBuf> = index
            .keys()
            .filter(|target| target.starts_with(prefix))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|target| index.remove_entry(&target))
            .collect()
    }

    /// Rewrites index entries for shadow files that themselves moved.
    fn rekey_shadows(&self, old: &Path, new: &Path) {
        let mut index = self.by_target.lock().unwrap_or_else(|e| e.into_inner());
        for shadows in index.values_mut() {
            let moved: Vec<PathBuf> = shadows
                .iter()
                .filter(|shadow| shadow.starts_with(old))
                .cloned()
                .collect();
            for shadow in moved {
                shadows.remove(&shadow);
                let suffix = shadow.strip_prefix(old).unwrap_or(&shadow).to_owned();
                shadows.insert(new.join(suffix));
            }
        }
    }
}

/// Adds a freshly recognized shadow to the index. A file that does not hold
/// a usable path is left out; it resolves as broken until rewritten.
pub(crate) fn index_shadow(env: &Arc<Env>, object: &DataObject) {
    let path = object.primary_path();
    env.shadows.forget(&path);
    match env.vfs.read_to_string(&path) {
        Ok(contents) => {
            let target = contents.trim();
            if target.is_empty() {
                log::debug!("Shadow {} is empty; not indexed", path.display());
            } else {
                env.shadows.record(Path::new(target), &path);
            }
        }
        Err(err) => {
            log::debug!("Could not read shadow {}: {}", path.display(), err);
        }
    }
}

/// Called after a path (and everything under it) moved from `old` to `new`.
/// Shadows pointing into the moved subtree are rewritten to the new
/// location; index entries for shadow files that moved are re-keyed.
pub(crate) fn on_target_moved(env: &Arc<Env>, old: &Path, new: &Path) {
    env.shadows.rekey_shadows(old, new);

    for (target, shadows) in env.shadows.take_targets_under(old) {
        let suffix = target.strip_prefix(old).unwrap_or(&target).to_owned();
        let new_target = new.join(suffix);

        for shadow in shadows {
            let written = env
                .vfs
                .write(&shadow, new_target.to_string_lossy().as_bytes());
            if let Err(err) = written {
                log::warn!(
                    "Could not retarget shadow {}: {}",
                    shadow.display(),
                    err
                );
                continue;
            }
            env.shadows.record(&new_target, &shadow);
        }
    }
}

/// Called after a path (and everything under it) was deleted. Shadows
/// pointing into the removed subtree are invalidated; the files stay, so a
/// later recognition sees them as broken links.
pub(crate) fn on_target_removed(env: &Arc<Env>, prefix: &Path) {
    for (_, shadows) in env.shadows.take_targets_under(prefix) {
        for shadow in shadows {
            if let Some(object) = env.registry.find(&shadow) {
                object.dispose();
            }
        }
    }
}
