//! Arbor maps files and folders on disk to live, observable data objects.
//!
//! A [`Session`] owns a virtual filesystem (see the `resfs` crate) and
//! recognizes paths into [`DataObject`]s through an ordered
//! [`RecognizerChain`]. Each path has at most one live object at a time;
//! folders expose sorted, cached child lists; structural operations (rename,
//! move, copy, delete) run as atomic sections that observers cannot see
//! half-done. External filesystem changes flow back in through an event
//! pump and keep the model in sync.

mod atomic;
mod children;
mod events;
mod folder;
mod object;
mod order;
mod recognize;
mod registry;
mod revalidate;
mod session;
mod shadow;
mod worker;

pub use crate::children::FilterListener;
pub use crate::events::{
    Event, PROP_CHILDREN, PROP_FILES, PROP_MODIFIED, PROP_NAME, PROP_PRIMARY_FILE,
    PROP_SORT_MODE, PROP_VALID,
};
pub use crate::folder::DataFolder;
pub use crate::object::{DataObject, ObjectKind, OpError, ATTR_LOCKED, ATTR_TEMPLATE};
pub use crate::order::{SortMode, ATTR_ORDER, ATTR_SORT_MODE};
pub use crate::recognize::{
    Claim, DefaultRecognizer, FolderRecognizer, LoaderId, PairedFileRecognizer, Recognizer,
    RecognizerChain, ShadowRecognizer, DEFAULT_LOADER, FOLDER_LOADER, SHADOW_LOADER,
};
pub use crate::session::Session;
pub use crate::shadow::{DataShadow, SHADOW_EXT};
pub use crate::worker::TaskHandle;
