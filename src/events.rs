//! Change events and their delivery.
//!
//! Most events are delivered asynchronously, in posting order, on a
//! dedicated notification queue. The one exception is object creation:
//! [`Notifier::deliver_sync`] runs creation listeners on the constructing
//! thread before the new object becomes findable, so a listener can finish
//! its setup before any other thread observes the object.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::worker::{TaskHandle, WorkQueue};

/// Property name fired when an object's validity flips.
pub const PROP_VALID: &str = "valid";
/// Property name fired when an object is renamed.
pub const PROP_NAME: &str = "name";
/// Property name fired when an object's modified flag changes.
pub const PROP_MODIFIED: &str = "modified";
/// Property name fired when the set of files backing an object changes.
pub const PROP_FILES: &str = "files";
/// Property name fired when an object's primary file moves.
pub const PROP_PRIMARY_FILE: &str = "primaryFile";
/// Property name fired on a folder when only the ordering of its children
/// changed.
pub const PROP_CHILDREN: &str = "children";
/// Property name fired on a folder when its sort mode is set.
pub const PROP_SORT_MODE: &str = "sortMode";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new object came into existence at `path`.
    ObjectCreated { path: PathBuf },

    /// A named property of the object at `path` changed.
    Property { path: PathBuf, name: &'static str },

    /// A folder's child list was recomputed and its membership changed.
    ChildrenChanged {
        folder: PathBuf,
        added: Vec<PathBuf>,
        removed: Vec<PathBuf>,
    },
}

type Listener = Box<dyn Fn(&Event) + Send + Sync>;

pub(crate) struct Notifier {
    listeners: Arc<Mutex<Vec<Listener>>>,
    queue: WorkQueue,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier {
            listeners: Arc::new(Mutex::new(Vec::new())),
            queue: WorkQueue::new("arbor-notify"),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    /// Queues `event` for delivery. Events posted from one thread reach
    /// listeners in posting order.
    pub fn post(&self, event: Event) -> TaskHandle {
        let listeners = Arc::clone(&self.listeners);
        self.queue.post(move || {
            let listeners = listeners.lock().unwrap_or_else(|e| e.into_inner());
            for listener in listeners.iter() {
                listener(&event);
            }
        })
    }

    /// Delivers `event` on the calling thread, before returning.
    pub fn deliver_sync(&self, event: &Event) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    #[test]
    fn posted_events_arrive_in_order() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        notifier.subscribe(move |event| {
            if let Event::Property { name, .. } = event {
                seen_clone.lock().unwrap().push(*name);
            }
        });

        notifier.post(Event::Property {
            path: PathBuf::from("/a"),
            name: PROP_NAME,
        });
        let last = notifier.post(Event::Property {
            path: PathBuf::from("/a"),
            name: PROP_MODIFIED,
        });
        last.wait();

        assert_eq!(*seen.lock().unwrap(), vec![PROP_NAME, PROP_MODIFIED]);
    }

    #[test]
    fn sync_delivery_runs_on_calling_thread() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = Arc::clone(&seen);
        notifier.subscribe(move |_| {
            *seen_clone.lock().unwrap() = Some(std::thread::current().id());
        });

        notifier.deliver_sync(&Event::ObjectCreated {
            path: Path::new("/a").to_owned(),
        });

        assert_eq!(
            *seen.lock().unwrap(),
            Some(std::thread::current().id()),
        );
    }
}
