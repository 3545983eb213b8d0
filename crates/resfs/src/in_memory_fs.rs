use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crossbeam_channel::{Receiver, Sender};

use crate::{DirEntry, Metadata, ReadDir, VfsBackend, VfsEvent, VfsSnapshot};

/// An in-memory `VfsBackend` implementation, useful for testing.
///
/// Paths are normalized on the way in, so `/a/b/../c` and `/a/c` refer to the
/// same entry. Mutating operations raise the same `VfsEvent`s a watcher-backed
/// filesystem would, which lets tests drive event-pump consumers without
/// touching the real disk.
pub struct InMemoryFs {
    entries: HashMap<PathBuf, Entry>,
    attrs: HashMap<PathBuf, BTreeMap<String, String>>,
    event_sender: Sender<VfsEvent>,
    event_receiver: Receiver<VfsEvent>,
}

#[derive(Debug)]
enum Entry {
    File {
        contents: Vec<u8>,
        modified: SystemTime,
    },
    Dir,
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }

    out
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("path not found: {}", path.display()),
    )
}

impl InMemoryFs {
    pub fn new() -> Self {
        let (event_sender, event_receiver) = crossbeam_channel::unbounded();

        Self {
            entries: HashMap::new(),
            attrs: HashMap::new(),
            event_sender,
            event_receiver,
        }
    }

    /// Load a snapshot tree at the given path, creating parent directories as
    /// needed. Does not raise events; intended for test setup.
    pub fn load_snapshot<P: AsRef<Path>>(
        &mut self,
        path: P,
        snapshot: VfsSnapshot,
    ) -> io::Result<()> {
        let path = normalize(path.as_ref());

        if let Some(parent) = path.parent() {
            let mut ancestor = PathBuf::new();
            for component in parent.components() {
                ancestor.push(component);
                self.entries.entry(ancestor.clone()).or_insert(Entry::Dir);
            }
        }

        self.load_inner(&path, snapshot);
        Ok(())
    }

    fn load_inner(&mut self, path: &Path, snapshot: VfsSnapshot) {
        match snapshot {
            VfsSnapshot::File { contents } => {
                self.entries.insert(
                    path.to_path_buf(),
                    Entry::File {
                        contents,
                        modified: SystemTime::now(),
                    },
                );
            }
            VfsSnapshot::Dir { children } => {
                self.entries.insert(path.to_path_buf(), Entry::Dir);

                for (name, child) in children {
                    self.load_inner(&path.join(name), child);
                }
            }
        }
    }

    fn send(&self, event: VfsEvent) {
        // A hung-up receiver just means nobody is pumping events.
        let _ = self.event_sender.send(event);
    }

    fn expect_parent_dir(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Ok(()),
            Some(parent) => match self.entries.get(parent) {
                Some(Entry::Dir) => Ok(()),
                Some(Entry::File { .. }) => Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("parent is not a directory: {}", parent.display()),
                )),
                None => Err(not_found(parent)),
            },
            None => Ok(()),
        }
    }

    fn descendant_keys(&self, root: &Path) -> Vec<PathBuf> {
        self.entries
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect()
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl VfsBackend for InMemoryFs {
    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>> {
        let path = normalize(path);
        match self.entries.get(&path) {
            Some(Entry::File { contents, .. }) => Ok(contents.clone()),
            Some(Entry::Dir) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("cannot read a directory: {}", path.display()),
            )),
            None => Err(not_found(&path)),
        }
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        let path = normalize(path);
        self.expect_parent_dir(&path)?;

        let existed = self.entries.contains_key(&path);
        self.entries.insert(
            path.clone(),
            Entry::File {
                contents: data.to_vec(),
                modified: SystemTime::now(),
            },
        );

        if existed {
            self.send(VfsEvent::Write(path));
        } else {
            self.send(VfsEvent::Create(path));
        }

        Ok(())
    }

    fn exists(&mut self, path: &Path) -> io::Result<bool> {
        let path = normalize(path);
        Ok(self.entries.contains_key(&path))
    }

    fn read_dir(&mut self, path: &Path) -> io::Result<ReadDir> {
        let path = normalize(path);
        match self.entries.get(&path) {
            Some(Entry::Dir) => {}
            Some(Entry::File { .. }) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("not a directory: {}", path.display()),
                ))
            }
            None => return Err(not_found(&path)),
        }

        let mut children: Vec<PathBuf> = self
            .entries
            .keys()
            .filter(|p| p.parent() == Some(path.as_path()))
            .cloned()
            .collect();
        children.sort();

        let inner = children.into_iter().map(|p| Ok(DirEntry { path: p }));

        Ok(ReadDir {
            inner: Box::new(inner),
        })
    }

    fn create_dir(&mut self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        self.expect_parent_dir(&path)?;

        if self.entries.contains_key(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("path already exists: {}", path.display()),
            ));
        }

        self.entries.insert(path.clone(), Entry::Dir);
        self.send(VfsEvent::Create(path));
        Ok(())
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut ancestor = PathBuf::new();

        for component in path.components() {
            ancestor.push(component);
            if !self.entries.contains_key(&ancestor) && !ancestor.as_os_str().is_empty() {
                self.entries.insert(ancestor.clone(), Entry::Dir);
                self.send(VfsEvent::Create(ancestor.clone()));
            }
        }

        Ok(())
    }

    fn metadata(&mut self, path: &Path) -> io::Result<Metadata> {
        let path = normalize(path);
        match self.entries.get(&path) {
            Some(Entry::File { contents, modified }) => Ok(Metadata {
                is_file: true,
                len: contents.len() as u64,
                modified: Some(*modified),
            }),
            Some(Entry::Dir) => Ok(Metadata {
                is_file: false,
                len: 0,
                modified: None,
            }),
            None => Err(not_found(&path)),
        }
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        match self.entries.get(&path) {
            Some(Entry::File { .. }) => {
                self.entries.remove(&path);
                self.attrs.remove(&path);
                self.send(VfsEvent::Remove(path));
                Ok(())
            }
            Some(Entry::Dir) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("is a directory: {}", path.display()),
            )),
            None => Err(not_found(&path)),
        }
    }

    fn remove_dir_all(&mut self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        if !self.entries.contains_key(&path) {
            return Err(not_found(&path));
        }

        for key in self.descendant_keys(&path) {
            self.entries.remove(&key);
            self.attrs.remove(&key);
        }

        self.send(VfsEvent::Remove(path));
        Ok(())
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        let from = normalize(from);
        let to = normalize(to);

        if !self.entries.contains_key(&from) {
            return Err(not_found(&from));
        }
        self.expect_parent_dir(&to)?;

        for key in self.descendant_keys(&from) {
            let suffix = key.strip_prefix(&from).expect("descendant under root");
            let new_key = to.join(suffix);

            if let Some(entry) = self.entries.remove(&key) {
                self.entries.insert(new_key.clone(), entry);
            }
            if let Some(attrs) = self.attrs.remove(&key) {
                self.attrs.insert(new_key, attrs);
            }
        }

        self.send(VfsEvent::Rename { from, to });
        Ok(())
    }

    fn canonicalize(&mut self, path: &Path) -> io::Result<PathBuf> {
        let path = normalize(path);
        if self.entries.contains_key(&path) {
            Ok(path)
        } else {
            Err(not_found(&path))
        }
    }

    fn get_attr(&mut self, path: &Path, key: &str) -> io::Result<Option<String>> {
        let path = normalize(path);
        if !self.entries.contains_key(&path) {
            return Err(not_found(&path));
        }

        Ok(self
            .attrs
            .get(&path)
            .and_then(|attrs| attrs.get(key))
            .cloned())
    }

    fn set_attr(&mut self, path: &Path, key: &str, value: Option<&str>) -> io::Result<()> {
        let path = normalize(path);
        if !self.entries.contains_key(&path) {
            return Err(not_found(&path));
        }

        match value {
            Some(value) => {
                self.attrs
                    .entry(path)
                    .or_default()
                    .insert(key.to_owned(), value.to_owned());
            }
            None => {
                if let Some(attrs) = self.attrs.get_mut(&path) {
                    attrs.remove(key);
                }
            }
        }

        Ok(())
    }

    fn event_receiver(&self) -> Receiver<VfsEvent> {
        self.event_receiver.clone()
    }

    fn watch(&mut self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn unwatch(&mut self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn file(contents: &str) -> VfsSnapshot {
        VfsSnapshot::file(contents)
    }

    #[test]
    fn rename_moves_subtree() {
        let mut fs = InMemoryFs::new();
        fs.load_snapshot("/root/a/inner.txt", file("inner")).unwrap();
        fs.load_snapshot("/root/a/deep", VfsSnapshot::dir([("leaf.txt", file("leaf"))]))
            .unwrap();

        fs.rename(Path::new("/root/a"), Path::new("/root/b")).unwrap();

        assert!(fs.exists(Path::new("/root/b/inner.txt")).unwrap());
        assert!(fs.exists(Path::new("/root/b/deep/leaf.txt")).unwrap());
        assert!(!fs.exists(Path::new("/root/a")).unwrap());
    }

    #[test]
    fn write_emits_create_then_write() {
        let mut fs = InMemoryFs::new();
        fs.load_snapshot("/dir", VfsSnapshot::empty_dir()).unwrap();
        let rx = fs.event_receiver();

        fs.write(Path::new("/dir/new.txt"), b"one").unwrap();
        fs.write(Path::new("/dir/new.txt"), b"two").unwrap();

        assert!(matches!(rx.try_recv().unwrap(), VfsEvent::Create(p) if p == Path::new("/dir/new.txt")));
        assert!(matches!(rx.try_recv().unwrap(), VfsEvent::Write(p) if p == Path::new("/dir/new.txt")));
    }

    #[test]
    fn read_dir_is_sorted() {
        let mut fs = InMemoryFs::new();
        fs.load_snapshot(
            "/dir",
            VfsSnapshot::dir([
                ("zebra.txt", file("z")),
                ("apple.txt", file("a")),
                ("mango.txt", file("m")),
            ]),
        )
        .unwrap();

        let names: Vec<String> = fs
            .read_dir(Path::new("/dir"))
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        assert_eq!(names, ["apple.txt", "mango.txt", "zebra.txt"]);
    }

    #[test]
    fn write_without_parent_fails() {
        let mut fs = InMemoryFs::new();
        let err = fs.write(Path::new("/missing/file.txt"), b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
