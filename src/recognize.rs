//! Recognition: turning raw paths into typed objects.
//!
//! A [`RecognizerChain`] consults its recognizers in priority order and the
//! first claim wins. A claim names the *primary* path of the resulting
//! object, which may differ from the probed path when several files make up
//! one object (the probe then redirects to the primary). A recognizer that
//! fails with an I/O error is treated as declining; the error is logged and
//! the chain moves on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use resfs::{IoResultExt, Vfs};

use crate::object::{DataObject, ObjectKind};
use crate::registry::Claimed;
use crate::session::Env;
use crate::shadow::{self, SHADOW_EXT};

/// Identifies the recognizer that produced an object. Two claims for the
/// same path by the same loader resolve to the same object; a claim by a
/// different loader asks the existing object to step aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(pub &'static str);

impl std::fmt::Display for LoaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

pub const FOLDER_LOADER: LoaderId = LoaderId("folder");
pub const SHADOW_LOADER: LoaderId = LoaderId("shadow");
pub const DEFAULT_LOADER: LoaderId = LoaderId("default");

/// A successful recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// The path that identifies the object. Usually the probed path, but a
    /// recognizer may redirect a companion file to its primary.
    pub primary: PathBuf,
    pub kind: ObjectKind,
    /// Additional files that belong to the object. Folder scans skip them
    /// rather than recognizing them as objects of their own.
    pub secondaries: Vec<PathBuf>,
}

impl Claim {
    /// A single-file claim for the probed path itself.
    pub fn solo(path: &Path, kind: ObjectKind) -> Self {
        Claim {
            primary: path.to_owned(),
            kind,
            secondaries: Vec::new(),
        }
    }
}

pub trait Recognizer: Send + Sync {
    fn id(&self) -> LoaderId;

    /// Inspects `path` and either claims it or declines with `Ok(None)`.
    fn try_claim(&self, vfs: &Vfs, path: &Path) -> anyhow::Result<Option<Claim>>;
}

pub struct RecognizerChain {
    recognizers: Vec<Arc<dyn Recognizer>>,
}

impl RecognizerChain {
    pub fn new(recognizers: Vec<Arc<dyn Recognizer>>) -> Self {
        RecognizerChain { recognizers }
    }

    /// The stock chain: folders, then shadows, then one object per file.
    /// Domain-specific recognizers are usually spliced in front of the
    /// default with [`RecognizerChain::with_front`].
    pub fn standard() -> Self {
        RecognizerChain::new(vec![
            Arc::new(FolderRecognizer),
            Arc::new(ShadowRecognizer),
            Arc::new(DefaultRecognizer),
        ])
    }

    /// The standard chain with `recognizer` consulted after folders and
    /// shadows but before the catch-all.
    pub fn with_front(recognizer: Arc<dyn Recognizer>) -> Self {
        RecognizerChain::new(vec![
            Arc::new(FolderRecognizer),
            Arc::new(ShadowRecognizer),
            recognizer,
            Arc::new(DefaultRecognizer),
        ])
    }

    pub(crate) fn first_claim(&self, vfs: &Vfs, path: &Path) -> Option<(LoaderId, Claim)> {
        for recognizer in &self.recognizers {
            match recognizer.try_claim(vfs, path) {
                Ok(Some(claim)) => return Some((recognizer.id(), claim)),
                Ok(None) => {}
                Err(err) => {
                    log::warn!(
                        "Recognizer {} failed on {}, skipping: {:?}",
                        recognizer.id(),
                        path.display(),
                        err
                    );
                }
            }
        }
        None
    }
}

/// Claims directories.
pub struct FolderRecognizer;

impl Recognizer for FolderRecognizer {
    fn id(&self) -> LoaderId {
        FOLDER_LOADER
    }

    fn try_claim(&self, vfs: &Vfs, path: &Path) -> anyhow::Result<Option<Claim>> {
        match vfs.metadata(path).with_not_found()? {
            Some(meta) if !meta.is_file() => Ok(Some(Claim::solo(path, ObjectKind::Folder))),
            _ => Ok(None),
        }
    }
}

/// Claims `.shadow` files, which point at another object by path.
pub struct ShadowRecognizer;

impl Recognizer for ShadowRecognizer {
    fn id(&self) -> LoaderId {
        SHADOW_LOADER
    }

    fn try_claim(&self, vfs: &Vfs, path: &Path) -> anyhow::Result<Option<Claim>> {
        let is_shadow = path.extension().is_some_and(|ext| ext == SHADOW_EXT)
            && vfs.metadata(path).with_not_found()?.is_some_and(|m| m.is_file());
        Ok(is_shadow.then(|| Claim::solo(path, ObjectKind::Shadow)))
    }
}

/// Claims any remaining file as a standalone object. Always last in a chain.
pub struct DefaultRecognizer;

impl Recognizer for DefaultRecognizer {
    fn id(&self) -> LoaderId {
        DEFAULT_LOADER
    }

    fn try_claim(&self, vfs: &Vfs, path: &Path) -> anyhow::Result<Option<Claim>> {
        match vfs.metadata(path).with_not_found()? {
            Some(meta) if meta.is_file() => Ok(Some(Claim::solo(path, ObjectKind::File))),
            _ => Ok(None),
        }
    }
}

/// Groups a primary file with same-stem companion files into one object.
///
/// Probing either the primary or a companion yields a claim whose primary is
/// the primary file, so the whole group resolves to a single object no
/// matter which member is seen first.
pub struct PairedFileRecognizer {
    id: LoaderId,
    primary_ext: String,
    companion_exts: Vec<String>,
}

impl PairedFileRecognizer {
    pub fn new(
        id: &'static str,
        primary_ext: impl Into<String>,
        companion_exts: Vec<String>,
    ) -> Self {
        PairedFileRecognizer {
            id: LoaderId(id),
            primary_ext: primary_ext.into(),
            companion_exts,
        }
    }

    fn present_companions(&self, vfs: &Vfs, parent: &Path, stem: &str) -> anyhow::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for ext in &self.companion_exts {
            let candidate = parent.join(format!("{stem}.{ext}"));
            if vfs.metadata(&candidate).with_not_found()?.is_some() {
                found.push(candidate);
            }
        }
        Ok(found)
    }
}

impl Recognizer for PairedFileRecognizer {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn try_claim(&self, vfs: &Vfs, path: &Path) -> anyhow::Result<Option<Claim>> {
        let (Some(parent), Some(stem), Some(ext)) = (
            path.parent(),
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) else {
            return Ok(None);
        };

        if ext == self.primary_ext {
            let secondaries = self.present_companions(vfs, parent, stem)?;
            return Ok(Some(Claim {
                primary: path.to_owned(),
                kind: ObjectKind::File,
                secondaries,
            }));
        }

        if self.companion_exts.iter().any(|c| c == ext) {
            let primary = parent.join(format!("{stem}.{}", self.primary_ext));
            if vfs.metadata(&primary).with_not_found()?.is_some() {
                let secondaries = self.present_companions(vfs, parent, stem)?;
                return Ok(Some(Claim {
                    primary,
                    kind: ObjectKind::File,
                    secondaries,
                }));
            }
        }

        Ok(None)
    }
}

/// Resolves `path` to its object, recognizing it if no live object exists.
///
/// Waits for the operation gate first, so recognition never observes the
/// middle of a structural operation on the same subtree.
pub(crate) fn find_or_create(env: &Arc<Env>, path: &Path) -> Option<DataObject> {
    env.gate.admit_recognition(path);

    if let Some(existing) = env.registry.find(path) {
        return Some(existing);
    }

    let (loader, claim) = env.chain.first_claim(&env.vfs, path)?;
    create_claimed(env, loader, claim)
}

/// Registers and constructs the object described by a claim. Creation events
/// are delivered before the object becomes visible to other threads.
pub(crate) fn create_claimed(env: &Arc<Env>, loader: LoaderId, claim: Claim) -> Option<DataObject> {
    match env.registry.register(&claim.primary, loader) {
        Claimed::Existing(existing) => Some(existing),
        Claimed::Fresh(registration) => {
            let object = DataObject::new(env, claim.kind, loader, claim.primary.clone(), claim.secondaries);
            registration.complete(&object);

            if claim.kind == ObjectKind::Shadow {
                shadow::index_shadow(env, &object);
            }

            env.registry.notify_created(&claim.primary, &env.notifier);
            Some(object)
        }
    }
}
