//! Client-side stat cache
//!
//! Last-known metadata for remote paths, written whenever a listing or an
//! explicit stat observes a path and read by the facade's existence and
//! attribute queries. Entries have no TTL: they stay valid until the
//! operation that changed the remote state explicitly invalidates them.
//!
//! The backing structure is attribute -> parent directory -> child name ->
//! value, so refreshing a directory listing can drop that directory's
//! children in one bulk operation per attribute without touching any other
//! directory.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Cached attribute kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    IsDir,
    Size,
    Modified,
    Permissions,
    Owner,
    Group,
}

const ALL_ATTRS: [Attr; 6] = [
    Attr::IsDir,
    Attr::Size,
    Attr::Modified,
    Attr::Permissions,
    Attr::Owner,
    Attr::Group,
];

/// Cached attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Size(u64),
    Time(DateTime<Utc>),
    Text(String),
}

/// Last-known metadata for one path, as written by a listing observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatRecord {
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

/// child name -> value, per parent directory
type DirMap = HashMap<String, HashMap<String, AttrValue>>;

/// Path-keyed metadata store.
///
/// Keys are full virtual-path strings (see `VirtualPath::cache_key`);
/// parent and child are derived by splitting on the last `/`. Lookups
/// return `Option` — the caller decides what a miss means for its own
/// contract.
#[derive(Default)]
pub struct StatCache {
    attrs: RwLock<HashMap<Attr, DirMap>>,
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, attr: Attr, value: AttrValue) {
        let (parent, child) = split_key(path);
        let mut attrs = self.attrs.write();
        attrs
            .entry(attr)
            .or_default()
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string(), value);
    }

    pub fn get(&self, path: &str, attr: Attr) -> Option<AttrValue> {
        let (parent, child) = split_key(path);
        let attrs = self.attrs.read();
        attrs.get(&attr)?.get(parent)?.get(child).cloned()
    }

    /// Read-and-remove a single attribute; used by rename to transplant
    /// cached data to the new path instead of recreating it.
    pub fn pop(&self, path: &str, attr: Attr) -> Option<AttrValue> {
        let (parent, child) = split_key(path);
        let mut attrs = self.attrs.write();
        attrs.get_mut(&attr)?.get_mut(parent)?.remove(child)
    }

    /// Drop every attribute cached for `path` itself.
    pub fn remove(&self, path: &str) {
        let (parent, child) = split_key(path);
        let mut attrs = self.attrs.write();
        for map in attrs.values_mut() {
            if let Some(children) = map.get_mut(parent) {
                children.remove(child);
            }
        }
    }

    /// Drop everything cached directly under the directory `path` — one
    /// bulk clear of the inner mapping per attribute. Entries for `path`
    /// itself and for other directories are untouched.
    pub fn clear_children(&self, path: &str) {
        let mut attrs = self.attrs.write();
        for map in attrs.values_mut() {
            map.remove(path);
        }
    }

    /// Write a full record for `path`, overwriting prior attributes.
    /// Absent optional fields clear the corresponding attribute.
    pub fn put_record(&self, path: &str, record: &StatRecord) {
        self.put(path, Attr::IsDir, AttrValue::Bool(record.is_dir));
        match record.size {
            Some(size) => self.put(path, Attr::Size, AttrValue::Size(size)),
            None => drop(self.pop(path, Attr::Size)),
        }
        match record.modified {
            Some(time) => self.put(path, Attr::Modified, AttrValue::Time(time)),
            None => drop(self.pop(path, Attr::Modified)),
        }
        for (attr, value) in [
            (Attr::Permissions, &record.permissions),
            (Attr::Owner, &record.owner),
            (Attr::Group, &record.group),
        ] {
            match value {
                Some(text) => self.put(path, attr, AttrValue::Text(text.clone())),
                None => drop(self.pop(path, attr)),
            }
        }
    }

    /// Move every cached attribute from `from` to `to` (pop + put). Paths
    /// with nothing cached transplant nothing.
    pub fn transplant(&self, from: &str, to: &str) {
        for attr in ALL_ATTRS {
            if let Some(value) = self.pop(from, attr) {
                self.put(to, attr, value);
            }
        }
    }

    pub fn is_dir(&self, path: &str) -> Option<bool> {
        match self.get(path, Attr::IsDir) {
            Some(AttrValue::Bool(b)) => Some(b),
            _ => None,
        }
    }

    pub fn size(&self, path: &str) -> Option<u64> {
        match self.get(path, Attr::Size) {
            Some(AttrValue::Size(n)) => Some(n),
            _ => None,
        }
    }

    pub fn modified(&self, path: &str) -> Option<DateTime<Utc>> {
        match self.get(path, Attr::Modified) {
            Some(AttrValue::Time(t)) => Some(t),
            _ => None,
        }
    }

    pub fn permissions(&self, path: &str) -> Option<String> {
        self.text(path, Attr::Permissions)
    }

    pub fn owner(&self, path: &str) -> Option<String> {
        self.text(path, Attr::Owner)
    }

    pub fn group(&self, path: &str) -> Option<String> {
        self.text(path, Attr::Group)
    }

    fn text(&self, path: &str, attr: Attr) -> Option<String> {
        match self.get(path, attr) {
            Some(AttrValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Split a cache key into (parent directory, child name).
fn split_key(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(split) => split,
        None => ("", path),
    }
}
