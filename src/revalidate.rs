//! Revalidation: re-running recognition over existing objects after the
//! rules changed (a recognizer was added or removed, or files changed in a
//! way that shifts claims).
//!
//! At most one pass runs at a time. Requests that arrive while a pass is
//! running are unioned into a single queued pass that starts when the
//! current one finishes; every caller waits for the pass containing its
//! paths and gets back the objects that refused to die.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use crate::object::DataObject;
use crate::recognize;
use crate::session::Env;

pub(crate) struct Revalidator {
    passes: Mutex<Passes>,
}

#[derive(Default)]
struct Passes {
    current: Option<Arc<Pass>>,
    next: Option<Arc<Pass>>,
}

struct Pass {
    paths: Mutex<HashSet<PathBuf>>,
    outcome: Mutex<Option<Vec<DataObject>>>,
    done: Condvar,
}

impl Pass {
    fn new(paths: impl IntoIterator<Item = PathBuf>) -> Arc<Pass> {
        Arc::new(Pass {
            paths: Mutex::new(paths.into_iter().collect()),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    fn wait(&self) -> Vec<DataObject> {
        let mut outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(refused) = outcome.as_ref() {
                return refused.clone();
            }
            outcome = self.done.wait(outcome).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn complete(&self, refused: Vec<DataObject>) {
        let mut outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        *outcome = Some(refused);
        self.done.notify_all();
    }
}

impl Revalidator {
    pub fn new() -> Self {
        Revalidator {
            passes: Mutex::new(Passes::default()),
        }
    }

    /// Revalidates the objects at `paths`. Blocks until the pass covering
    /// them completes and returns the objects that vetoed replacement.
    pub fn revalidate(
        &self,
        env: &Arc<Env>,
        paths: impl IntoIterator<Item = PathBuf>,
    ) -> Vec<DataObject> {
        let (pass, starts_now) = {
            let mut passes = self.passes.lock().unwrap_or_else(|e| e.into_inner());

            if let Some(next) = &passes.next {
                // A pass is already queued behind the running one; join it.
                next.paths
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend(paths);
                (Arc::clone(next), false)
            } else if passes.current.is_some() {
                let pass = Pass::new(paths);
                passes.next = Some(Arc::clone(&pass));
                (pass, false)
            } else {
                let pass = Pass::new(paths);
                passes.current = Some(Arc::clone(&pass));
                (pass, true)
            }
        };

        if starts_now {
            schedule(env, Arc::clone(&pass));
        }
        pass.wait()
    }
}

fn schedule(env: &Arc<Env>, pass: Arc<Pass>) {
    let env_clone = Arc::clone(env);
    env.revalidation.post(move || run_pass(&env_clone, pass));
}

fn run_pass(env: &Arc<Env>, pass: Arc<Pass>) {
    let paths: Vec<PathBuf> = {
        let paths = pass.paths.lock().unwrap_or_else(|e| e.into_inner());
        paths.iter().cloned().collect()
    };

    let mut refused = Vec::new();
    for path in paths {
        env.gate.admit_recognition(&path);
        let Some(object) = env.registry.find(&path) else {
            continue;
        };

        let current = env.chain.first_claim(&env.vfs, &path);
        if matches!(&current, Some((loader, _)) if *loader == object.loader()) {
            continue;
        }

        // The path now belongs to a different loader (or to nobody). The
        // existing object must agree to step aside.
        if object.request_invalidate().is_err() {
            refused.push(object);
            continue;
        }
        if let Some((loader, claim)) = current {
            recognize::create_claimed(env, loader, claim);
        }
        if let Some(parent) = path.parent() {
            env.refresh_folder(parent);
        }
    }

    pass.complete(refused);

    // Promote the queued pass, if any.
    let next = {
        let mut passes = env
            .revalidator
            .passes
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        passes.current = passes.next.take();
        passes.current.clone()
    };
    if let Some(next) = next {
        schedule(env, next);
    }
}
