//! Child ordering: sort modes, pinned partial orders, and the comparators
//! behind them.
//!
//! Both settings persist as folder attributes. The sort mode is stored as a
//! single character code; the pinned order is a `/`-separated list of child
//! names. Metadata needed by a comparator is fetched once per child before
//! sorting, so a sort never touches the filesystem mid-comparison.

use std::cmp::Ordering;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use resfs::{IoResultExt, Vfs};

use crate::object::{DataObject, ObjectKind};

/// Folder attribute holding the sort mode code.
pub const ATTR_SORT_MODE: &str = "folder.sortMode";
/// Folder attribute holding the pinned child order.
pub const ATTR_ORDER: &str = "folder.order";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Filesystem enumeration order, untouched.
    Unsorted,
    /// By name.
    Names,
    /// By loader, then name.
    Class,
    /// Folders first, then by name.
    #[default]
    FolderNames,
    /// Folders first, then most recently modified first.
    LastModified,
    /// Folders first, then largest first.
    Size,
    /// Folders first, then by extension, then by name.
    Extensions,
    /// Folders first, then by name with digit runs compared numerically.
    Natural,
}

impl SortMode {
    pub fn code(self) -> char {
        match self {
            SortMode::Unsorted => 'O',
            SortMode::Names => 'N',
            SortMode::Class => 'C',
            SortMode::FolderNames => 'F',
            SortMode::LastModified => 'M',
            SortMode::Size => 'S',
            SortMode::Extensions => 'X',
            SortMode::Natural => 'L',
        }
    }

    pub fn from_code(code: char) -> Option<SortMode> {
        Some(match code {
            'O' => SortMode::Unsorted,
            'N' => SortMode::Names,
            'C' => SortMode::Class,
            'F' => SortMode::FolderNames,
            'M' => SortMode::LastModified,
            'S' => SortMode::Size,
            'X' => SortMode::Extensions,
            'L' => SortMode::Natural,
            _ => return None,
        })
    }

    /// Reads the persisted mode for `folder`. Missing or unparseable
    /// attributes fall back to the default.
    pub(crate) fn read(vfs: &Vfs, folder: &Path) -> SortMode {
        let stored = match vfs.get_attr(folder, ATTR_SORT_MODE) {
            Ok(value) => value,
            Err(err) => {
                log::warn!(
                    "Could not read sort mode of {}: {}",
                    folder.display(),
                    err
                );
                None
            }
        };

        stored
            .as_deref()
            .and_then(|s| {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(code), None) => SortMode::from_code(code),
                    _ => None,
                }
            })
            .unwrap_or_default()
    }

    pub(crate) fn write(self, vfs: &Vfs, folder: &Path) -> io::Result<()> {
        vfs.set_attr(folder, ATTR_SORT_MODE, Some(&self.code().to_string()))
    }
}

/// Reads the pinned child names for `folder`, in pinned order.
pub(crate) fn read_pinned(vfs: &Vfs, folder: &Path) -> Vec<String> {
    match vfs.get_attr(folder, ATTR_ORDER) {
        Ok(Some(raw)) => raw
            .split('/')
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect(),
        Ok(None) => Vec::new(),
        Err(err) => {
            log::warn!(
                "Could not read pinned order of {}: {}",
                folder.display(),
                err
            );
            Vec::new()
        }
    }
}

pub(crate) fn write_pinned(vfs: &Vfs, folder: &Path, names: &[String]) -> io::Result<()> {
    if names.is_empty() {
        vfs.set_attr(folder, ATTR_ORDER, None)
    } else {
        vfs.set_attr(folder, ATTR_ORDER, Some(&names.join("/")))
    }
}

/// Per-child facts captured up front for the comparators. Names compare as
/// the primary file's full name, extension included.
struct SortKey {
    name: String,
    is_folder: bool,
    loader: &'static str,
    extension: String,
    size: u64,
    modified: Option<SystemTime>,
}

impl SortKey {
    fn capture(vfs: &Vfs, object: &DataObject) -> SortKey {
        let path = object.primary_path();
        let meta = vfs.metadata(&path).with_not_found().ok().flatten();

        SortKey {
            name: object.file_name(),
            is_folder: object.kind() == ObjectKind::Folder,
            loader: object.loader().0,
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_owned(),
            size: meta.as_ref().map(|m| m.len()).unwrap_or(0),
            modified: meta.as_ref().and_then(|m| m.modified()),
        }
    }
}

/// Sorts `children` in place according to the folder's persisted sort mode,
/// then moves pinned children to the front in pinned order. The sort is
/// stable, so equal children keep their enumeration order.
pub(crate) fn sort_children(vfs: &Vfs, folder: &Path, children: &mut Vec<DataObject>) {
    let mode = SortMode::read(vfs, folder);

    if mode != SortMode::Unsorted {
        let mut keyed: Vec<(SortKey, DataObject)> = children
            .drain(..)
            .map(|child| (SortKey::capture(vfs, &child), child))
            .collect();

        keyed.sort_by(|(a, _), (b, _)| compare(mode, a, b));
        children.extend(keyed.into_iter().map(|(_, child)| child));
    }

    apply_pinned(vfs, folder, children);
}

fn compare(mode: SortMode, a: &SortKey, b: &SortKey) -> Ordering {
    match mode {
        SortMode::Unsorted => Ordering::Equal,
        SortMode::Names => a.name.cmp(&b.name),
        SortMode::Class => a.loader.cmp(b.loader).then_with(|| a.name.cmp(&b.name)),
        SortMode::FolderNames => folders_first(a, b).then_with(|| a.name.cmp(&b.name)),
        SortMode::LastModified => folders_first(a, b)
            .then_with(|| b.modified.cmp(&a.modified))
            .then_with(|| a.name.cmp(&b.name)),
        SortMode::Size => folders_first(a, b)
            .then_with(|| b.size.cmp(&a.size))
            .then_with(|| a.name.cmp(&b.name)),
        SortMode::Extensions => folders_first(a, b)
            .then_with(|| a.extension.cmp(&b.extension))
            .then_with(|| a.name.cmp(&b.name)),
        SortMode::Natural => folders_first(a, b).then_with(|| natural_cmp(&a.name, &b.name)),
    }
}

fn folders_first(a: &SortKey, b: &SortKey) -> Ordering {
    b.is_folder.cmp(&a.is_folder)
}

/// Compares names segment by segment, where a segment is a maximal run of
/// digits or of non-digits. Digit runs compare by numeric value; equal
/// values with different spellings put the shorter spelling first, so `1`
/// sorts before `01`.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_rest = a;
    let mut b_rest = b;

    loop {
        match (a_rest.is_empty(), b_rest.is_empty()) {
            (true, true) => return a.cmp(b),
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        let (a_seg, a_digits) = split_segment(a_rest);
        let (b_seg, b_digits) = split_segment(b_rest);

        let ordering = if a_digits && b_digits {
            numeric_cmp(a_seg, b_seg)
        } else {
            a_seg.cmp(b_seg)
        };
        if ordering != Ordering::Equal {
            return ordering;
        }

        a_rest = &a_rest[a_seg.len()..];
        b_rest = &b_rest[b_seg.len()..];
    }
}

fn split_segment(s: &str) -> (&str, bool) {
    let digits = s.starts_with(|c: char| c.is_ascii_digit());
    let end = s
        .find(|c: char| c.is_ascii_digit() != digits)
        .unwrap_or(s.len());
    (&s[..end], digits)
}

fn numeric_cmp(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');

    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        .then_with(|| a.len().cmp(&b.len()))
}

/// Moves children named in the pinned list to the front, in list order.
/// Pinned names with no matching child are ignored; unpinned children keep
/// their relative order after the pinned block.
fn apply_pinned(vfs: &Vfs, folder: &Path, children: &mut Vec<DataObject>) {
    let pinned = read_pinned(vfs, folder);
    if pinned.is_empty() {
        return;
    }

    let mut front = Vec::new();
    for name in &pinned {
        if let Some(idx) = children.iter().position(|c| &c.file_name() == name) {
            front.push(children.remove(idx));
        }
    }
    front.append(children);
    *children = front;
}
