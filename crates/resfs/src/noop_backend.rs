use std::io;
use std::path::{Path, PathBuf};

use crate::{Metadata, ReadDir, VfsBackend, VfsEvent};

/// `VfsBackend` that returns an error on every operation. Useful as a stand-in
/// where a filesystem is required but must never actually be touched.
pub struct NoopBackend;

impl NoopBackend {
    pub fn new() -> Self {
        NoopBackend
    }
}

impl Default for NoopBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn noop_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        "this filesystem is a NoopBackend, no operations are supported",
    )
}

impl VfsBackend for NoopBackend {
    fn read(&mut self, _path: &Path) -> io::Result<Vec<u8>> {
        Err(noop_error())
    }

    fn write(&mut self, _path: &Path, _data: &[u8]) -> io::Result<()> {
        Err(noop_error())
    }

    fn exists(&mut self, _path: &Path) -> io::Result<bool> {
        Err(noop_error())
    }

    fn read_dir(&mut self, _path: &Path) -> io::Result<ReadDir> {
        Err(noop_error())
    }

    fn create_dir(&mut self, _path: &Path) -> io::Result<()> {
        Err(noop_error())
    }

    fn create_dir_all(&mut self, _path: &Path) -> io::Result<()> {
        Err(noop_error())
    }

    fn metadata(&mut self, _path: &Path) -> io::Result<Metadata> {
        Err(noop_error())
    }

    fn remove_file(&mut self, _path: &Path) -> io::Result<()> {
        Err(noop_error())
    }

    fn remove_dir_all(&mut self, _path: &Path) -> io::Result<()> {
        Err(noop_error())
    }

    fn rename(&mut self, _from: &Path, _to: &Path) -> io::Result<()> {
        Err(noop_error())
    }

    fn canonicalize(&mut self, _path: &Path) -> io::Result<PathBuf> {
        Err(noop_error())
    }

    fn get_attr(&mut self, _path: &Path, _key: &str) -> io::Result<Option<String>> {
        Err(noop_error())
    }

    fn set_attr(&mut self, _path: &Path, _key: &str, _value: Option<&str>) -> io::Result<()> {
        Err(noop_error())
    }

    fn event_receiver(&self) -> crossbeam_channel::Receiver<VfsEvent> {
        crossbeam_channel::never()
    }

    fn watch(&mut self, _path: &Path) -> io::Result<()> {
        Err(noop_error())
    }

    fn unwatch(&mut self, _path: &Path) -> io::Result<()> {
        Err(noop_error())
    }
}
