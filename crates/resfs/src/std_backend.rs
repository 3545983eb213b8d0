use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use notify::RecursiveMode;
use notify_debouncer_full::{
    new_debouncer,
    notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};

use crate::{DirEntry, Metadata, ReadDir, VfsBackend, VfsEvent};

/// `VfsBackend` that uses `std::fs` and the `notify` crate.
///
/// Attributes are held in an in-memory overlay scoped to the backend; the only
/// consumers today persist ordering metadata per session, which does not need
/// to survive the process.
pub struct StdBackend {
    debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
    watcher_receiver: Receiver<VfsEvent>,
    watches: HashSet<PathBuf>,
    attrs: HashMap<PathBuf, BTreeMap<String, String>>,
}

impl StdBackend {
    pub fn new() -> StdBackend {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let debouncer = Self::create_debouncer(event_tx);

        Self {
            debouncer,
            watcher_receiver: event_rx,
            watches: HashSet::new(),
            attrs: HashMap::new(),
        }
    }

    fn create_debouncer(
        event_tx: Sender<VfsEvent>,
    ) -> Debouncer<notify::RecommendedWatcher, RecommendedCache> {
        let debounce_timeout = Duration::from_millis(50);

        new_debouncer(
            debounce_timeout,
            None, // Use default tick rate
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for vfs_event in Self::convert_event(&event.event) {
                            if event_tx.send(vfs_event).is_err() {
                                // Receiver hung up; the Vfs is gone.
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        log::warn!("File watcher error: {:?}", error);
                    }
                }
            },
        )
        .expect("Failed to create file watcher debouncer")
    }

    /// Convert a notify event to our VfsEvent(s)
    fn convert_event(event: &notify::Event) -> Vec<VfsEvent> {
        let mut vfs_events = Vec::new();

        match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Folder)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Create(CreateKind::Other) => {
                for path in &event.paths {
                    vfs_events.push(VfsEvent::Create(path.clone()));
                }
            }

            EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Other) => {
                for path in &event.paths {
                    vfs_events.push(VfsEvent::Write(path.clone()));
                }
            }

            // Metadata changes carry no content we track.
            EventKind::Modify(ModifyKind::Metadata(_)) => {}

            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // Both paths present: old path at [0], new path at [1]
                if event.paths.len() >= 2 {
                    vfs_events.push(VfsEvent::Rename {
                        from: event.paths[0].clone(),
                        to: event.paths[1].clone(),
                    });
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    vfs_events.push(VfsEvent::Remove(path.clone()));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    vfs_events.push(VfsEvent::Create(path.clone()));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Any))
            | EventKind::Modify(ModifyKind::Name(RenameMode::Other)) => {
                for path in &event.paths {
                    vfs_events.push(VfsEvent::Write(path.clone()));
                }
            }

            EventKind::Remove(RemoveKind::File)
            | EventKind::Remove(RemoveKind::Folder)
            | EventKind::Remove(RemoveKind::Any)
            | EventKind::Remove(RemoveKind::Other) => {
                for path in &event.paths {
                    vfs_events.push(VfsEvent::Remove(path.clone()));
                }
            }

            EventKind::Access(_) => {}

            EventKind::Other | EventKind::Any => {
                for path in &event.paths {
                    vfs_events.push(VfsEvent::Write(path.clone()));
                }
            }
        }

        vfs_events
    }

    fn move_attrs(&mut self, from: &Path, to: &Path) {
        let moved: Vec<PathBuf> = self
            .attrs
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();

        for key in moved {
            let suffix = key.strip_prefix(from).expect("key under prefix");
            let new_key = to.join(suffix);
            if let Some(attrs) = self.attrs.remove(&key) {
                self.attrs.insert(new_key, attrs);
            }
        }
    }
}

impl VfsBackend for StdBackend {
    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>> {
        fs_err::read(path)
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs_err::write(path, data)
    }

    fn exists(&mut self, path: &Path) -> io::Result<bool> {
        std::fs::exists(path)
    }

    fn read_dir(&mut self, path: &Path) -> io::Result<ReadDir> {
        let entries: Result<Vec<_>, _> = fs_err::read_dir(path)?.collect();
        let mut entries = entries?;

        entries.sort_by_cached_key(|entry| entry.file_name());

        let inner = entries
            .into_iter()
            .map(|entry| Ok(DirEntry { path: entry.path() }));

        Ok(ReadDir {
            inner: Box::new(inner),
        })
    }

    fn create_dir(&mut self, path: &Path) -> io::Result<()> {
        fs_err::create_dir(path)
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        fs_err::create_dir_all(path)
    }

    fn metadata(&mut self, path: &Path) -> io::Result<Metadata> {
        let inner = fs_err::metadata(path)?;

        Ok(Metadata {
            is_file: inner.is_file(),
            len: inner.len(),
            modified: inner.modified().ok(),
        })
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        self.attrs.remove(path);
        fs_err::remove_file(path)
    }

    fn remove_dir_all(&mut self, path: &Path) -> io::Result<()> {
        let removed: Vec<PathBuf> = self
            .attrs
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for key in removed {
            self.attrs.remove(&key);
        }

        fs_err::remove_dir_all(path)
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        fs_err::rename(from, to)?;
        self.move_attrs(from, to);
        Ok(())
    }

    fn canonicalize(&mut self, path: &Path) -> io::Result<PathBuf> {
        fs_err::canonicalize(path)
    }

    fn get_attr(&mut self, path: &Path, key: &str) -> io::Result<Option<String>> {
        Ok(self
            .attrs
            .get(path)
            .and_then(|attrs| attrs.get(key))
            .cloned())
    }

    fn set_attr(&mut self, path: &Path, key: &str, value: Option<&str>) -> io::Result<()> {
        match value {
            Some(value) => {
                self.attrs
                    .entry(path.to_path_buf())
                    .or_default()
                    .insert(key.to_owned(), value.to_owned());
            }
            None => {
                if let Some(attrs) = self.attrs.get_mut(path) {
                    attrs.remove(key);
                }
            }
        }

        Ok(())
    }

    fn event_receiver(&self) -> crossbeam_channel::Receiver<VfsEvent> {
        self.watcher_receiver.clone()
    }

    fn watch(&mut self, path: &Path) -> io::Result<()> {
        if self.watches.contains(path)
            || path
                .ancestors()
                .any(|ancestor| self.watches.contains(ancestor))
        {
            Ok(())
        } else {
            // Only record the watch after it succeeds, so a failed watch does
            // not permanently mark the path as covered.
            match self.debouncer.watch(path, RecursiveMode::Recursive) {
                Ok(()) => {
                    log::trace!("Watching path: {}", path.display());
                    self.watches.insert(path.to_path_buf());
                    Ok(())
                }
                Err(err) => {
                    log::warn!("Failed to watch path {}: {:?}", path.display(), err);
                    Err(io::Error::other(format!("{:?}", err)))
                }
            }
        }
    }

    fn unwatch(&mut self, path: &Path) -> io::Result<()> {
        match self.debouncer.unwatch(path) {
            Ok(()) => {
                self.watches.remove(path);
                Ok(())
            }
            Err(err) => {
                // The common case: the path was covered by a watched ancestor
                // and was never directly watched itself.
                if matches!(
                    err.kind,
                    notify::ErrorKind::WatchNotFound | notify::ErrorKind::PathNotFound
                ) {
                    self.watches.remove(path);
                    Ok(())
                } else {
                    log::warn!("Failed to unwatch path {}: {:?}", path.display(), err);
                    Err(io::Error::other(format!("{:?}", err)))
                }
            }
        }
    }
}

impl Default for StdBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn metadata_reports_len_and_kind() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");
        fs_err::write(&file_path, "twelve bytes").unwrap();

        let mut backend = StdBackend::new();

        let meta = backend.metadata(&file_path).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.len(), 12);
        assert!(meta.modified().is_some());

        let meta = backend.metadata(dir.path()).unwrap();
        assert!(meta.is_dir());
    }

    #[test]
    fn attrs_survive_rename() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        fs_err::create_dir(&from).unwrap();

        let mut backend = StdBackend::new();
        backend.set_attr(&from, "sortMode", Some("N")).unwrap();
        backend.rename(&from, &to).unwrap();

        assert_eq!(backend.get_attr(&to, "sortMode").unwrap().as_deref(), Some("N"));
        assert_eq!(backend.get_attr(&from, "sortMode").unwrap(), None);
    }

    #[test]
    fn watch_ancestor_covers_descendants() {
        let dir = tempdir().unwrap();
        let subdir = dir.path().join("subdir");
        fs_err::create_dir(&subdir).unwrap();
        let file_path = subdir.join("test.txt");
        fs_err::write(&file_path, "test content").unwrap();

        let mut backend = StdBackend::new();

        assert!(backend.watch(&subdir).is_ok());
        // Watching a file inside should be a no-op (covered by parent).
        assert!(backend.watch(&file_path).is_ok());
    }

    #[test]
    fn unwatch_handles_not_found_gracefully() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");
        fs_err::write(&file_path, "test content").unwrap();

        let mut backend = StdBackend::new();

        // Unwatching a path that was never watched must not panic and must
        // leave the backend usable.
        let _ = backend.unwatch(&file_path);
        assert!(backend.watch(&file_path).is_ok());
    }
}
