//! Folder handles: the child-facing API over folder-kind objects.

use std::path::PathBuf;
use std::sync::Arc;

use crate::children::FilterListener;
use crate::events::{Event, PROP_SORT_MODE};
use crate::object::{DataObject, ObjectKind, OpError};
use crate::order::{self, SortMode};
use crate::recognize;
use crate::session::Env;
use crate::worker::TaskHandle;

/// A recognized folder. Wraps the underlying object; conversion fails for
/// anything that is not folder-kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFolder {
    object: DataObject,
}

impl TryFrom<DataObject> for DataFolder {
    type Error = OpError;

    fn try_from(object: DataObject) -> Result<Self, OpError> {
        if object.kind() == ObjectKind::Folder {
            Ok(DataFolder { object })
        } else {
            Err(OpError::NotAFolder {
                path: object.primary_path(),
            })
        }
    }
}

impl DataFolder {
    pub fn as_object(&self) -> &DataObject {
        &self.object
    }

    pub fn into_object(self) -> DataObject {
        self.object
    }

    pub fn path(&self) -> PathBuf {
        self.object.primary_path()
    }

    fn env(&self) -> Result<Arc<Env>, OpError> {
        self.object.session_env()
    }

    /// The folder's children, sorted per its sort mode and pinned order.
    /// Blocks while the first computation runs; afterwards reads return the
    /// last published list without blocking.
    pub fn get_children(&self) -> Result<Vec<DataObject>, OpError> {
        let env = self.env()?;
        Ok(env.folders.for_folder(&self.path()).get_children(&env))
    }

    /// Delivers the children to `callback` once known, without blocking.
    pub fn compute_children(
        &self,
        callback: impl FnOnce(&[DataObject]) + Send + 'static,
    ) -> Result<TaskHandle, OpError> {
        let env = self.env()?;
        Ok(env
            .folders
            .for_folder(&self.path())
            .compute_children_async(&env, callback))
    }

    /// Schedules a rescan of this folder's children.
    pub fn refresh(&self) -> Result<TaskHandle, OpError> {
        let env = self.env()?;
        Ok(env.folders.for_folder(&self.path()).refresh(&env))
    }

    /// Installs a listener that observes every published child list of this
    /// folder.
    pub fn set_children_filter(&self, filter: FilterListener) -> Result<(), OpError> {
        let env = self.env()?;
        env.folders.for_folder(&self.path()).set_filter(filter);
        Ok(())
    }

    pub fn sort_mode(&self) -> Result<SortMode, OpError> {
        let env = self.env()?;
        Ok(SortMode::read(&env.vfs, &self.path()))
    }

    /// Persists a new sort mode and schedules a reorder. Readers keep seeing
    /// the old order until the reorder publishes.
    pub fn set_sort_mode(&self, mode: SortMode) -> Result<TaskHandle, OpError> {
        let env = self.env()?;
        let path = self.path();

        mode.write(&env.vfs, &path).map_err(|err| OpError::Io {
            op: "set sort mode",
            path: path.clone(),
            source: err,
        })?;
        env.notifier.post(Event::Property {
            path: path.clone(),
            name: PROP_SORT_MODE,
        });
        Ok(env.folders.for_folder(&path).reorder(&env))
    }

    pub fn pinned_order(&self) -> Result<Vec<String>, OpError> {
        let env = self.env()?;
        Ok(order::read_pinned(&env.vfs, &self.path()))
    }

    /// Persists a pinned partial order over child file names and schedules a
    /// reorder. Pinned children come first, in list order; the rest keep the
    /// sort mode's order.
    pub fn set_order(&self, names: &[String]) -> Result<TaskHandle, OpError> {
        let env = self.env()?;
        let path = self.path();

        order::write_pinned(&env.vfs, &path, names).map_err(|err| OpError::Io {
            op: "set order",
            path: path.clone(),
            source: err,
        })?;
        Ok(env.folders.for_folder(&path).reorder(&env))
    }

    /// Creates a subfolder and returns its object.
    pub fn create_folder(&self, name: &str) -> Result<DataFolder, OpError> {
        let env = self.env()?;
        let path = self.path();
        let child = path.join(name);

        env.gate.run_atomic(&path, || {
            env.vfs.create_dir(&child).map_err(|err| OpError::Io {
                op: "create folder",
                path: child.clone(),
                source: err,
            })?;

            env.refresh_folder(&path);
            let object = recognize::find_or_create(&env, &child).ok_or(OpError::Unrecognized {
                path: child.clone(),
            })?;
            DataFolder::try_from(object)
        })
    }

    /// Creates a file child with the given contents and returns its object.
    pub fn create_data(&self, name: &str, contents: &[u8]) -> Result<DataObject, OpError> {
        let env = self.env()?;
        let path = self.path();
        let child = path.join(name);

        env.gate.run_atomic(&path, || {
            if env.vfs.exists(&child).unwrap_or(false) {
                return Err(OpError::Io {
                    op: "create data",
                    path: child.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "target already exists",
                    ),
                });
            }
            env.vfs.write(&child, contents).map_err(|err| OpError::Io {
                op: "create data",
                path: child.clone(),
                source: err,
            })?;

            env.refresh_folder(&path);
            recognize::find_or_create(&env, &child).ok_or(OpError::Unrecognized { path: child })
        })
    }
}
