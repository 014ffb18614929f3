//! per-path optimistic version tracking plus read/write/delete locking
//!
//! a path is an ordered sequence of strings (e.g. `["chat", user_id,
//! chat_id]`). every lock acquisition is immediate: there is no waiting,
//! callers that collide with an existing holder get an error back right
//! away and are expected to retry or serialize upstream.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// an ordered hierarchical resource path.
pub type ResourcePath = Vec<String>;

fn path_of(segments: &[&str]) -> ResourcePath {
    segments.iter().map(|s| s.to_string()).collect()
}

struct ResourceState<Id> {
    up_to_date: HashSet<Id>,
    read_holders: HashSet<Id>,
    write_holder: Option<Id>,
}

impl<Id> Default for ResourceState<Id> {
    fn default() -> Self {
        Self {
            up_to_date: HashSet::new(),
            read_holders: HashSet::new(),
            write_holder: None,
        }
    }
}

struct Inner<Id> {
    states: Mutex<HashMap<ResourcePath, ResourceState<Id>>>,
}

/// per-path read/write/delete locking with up-to-date tracking, keyed by an
/// arbitrary caller identity `Id`.
pub struct ResourceVersionManager<Id> {
    inner: Arc<Inner<Id>>,
}

impl<Id> Clone for ResourceVersionManager<Id> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Id> Default for ResourceVersionManager<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Clone + Eq + Hash> ResourceVersionManager<Id> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// take a read lock on `path` for `id`. fails with [`Error::NotModified`]
    /// if `id` is already up to date on this path (checked before any lock
    /// is taken), or [`Error::Locked`] if a writer currently holds the path.
    pub fn read_lock(&self, path: &[&str], id: Id) -> Result<Guard<Id>> {
        let path = path_of(path);
        let mut states = self.inner.states.lock();

        if let Some(state) = states.get(&path) {
            if state.up_to_date.contains(&id) {
                return Err(Error::NotModified);
            }
            if state.write_holder.is_some() {
                return Err(Error::Locked);
            }
        }

        states
            .entry(path.clone())
            .or_default()
            .read_holders
            .insert(id.clone());

        Ok(Guard {
            manager: Arc::downgrade(&self.inner),
            path,
            id,
            kind: GuardKind::Read,
            confirmed: false,
        })
    }

    /// take a write lock on `path` for `id`. the caller must already be
    /// up to date (else [`Error::Conflict`]); a concurrent reader or writer
    /// yields [`Error::Locked`].
    pub fn write_lock(&self, path: &[&str], id: Id) -> Result<Guard<Id>> {
        let path = path_of(path);
        let mut states = self.inner.states.lock();
        Self::check_writer_version(&states, &path, &id)?;

        let state = states.get_mut(&path).expect("checked above");
        if state.write_holder.is_some() {
            return Err(Error::Locked);
        }
        if !state.read_holders.is_empty() {
            return Err(Error::Locked);
        }
        state.write_holder = Some(id.clone());

        Ok(Guard {
            manager: Arc::downgrade(&self.inner),
            path,
            id,
            kind: GuardKind::Write,
            confirmed: false,
        })
    }

    /// take a delete lock on `path` for `id`. same preconditions as
    /// [`Self::write_lock`]; confirming removes the path's entry entirely
    /// instead of narrowing `up_to_date` to the single confirming id.
    pub fn delete_lock(&self, path: &[&str], id: Id) -> Result<Guard<Id>> {
        let path = path_of(path);
        let mut states = self.inner.states.lock();
        Self::check_writer_version(&states, &path, &id)?;

        let state = states.get_mut(&path).expect("checked above");
        if state.write_holder.is_some() {
            return Err(Error::Locked);
        }
        if !state.read_holders.is_empty() {
            return Err(Error::Locked);
        }
        state.write_holder = Some(id.clone());

        Ok(Guard {
            manager: Arc::downgrade(&self.inner),
            path,
            id,
            kind: GuardKind::Delete,
            confirmed: false,
        })
    }

    fn check_writer_version(
        states: &HashMap<ResourcePath, ResourceState<Id>>,
        path: &ResourcePath,
        id: &Id,
    ) -> Result<()> {
        match states.get(path) {
            None => Err(Error::Conflict),
            Some(state) if !state.up_to_date.contains(id) => Err(Error::Conflict),
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardKind {
    Read,
    Write,
    Delete,
}

/// a scoped lock handle. `confirm()` commits the version effect described
/// in the table below; dropping without confirming releases the lock
/// without touching `up_to_date`.
///
/// | kind   | on confirm                                     |
/// |--------|-------------------------------------------------|
/// | read   | `up_to_date.insert(id)`                          |
/// | write  | `up_to_date = {id}`                              |
/// | delete | the path's entry is removed entirely             |
///
/// the guard holds only a weak reference to the manager, so it never keeps
/// the manager alive on its own.
pub struct Guard<Id> {
    manager: Weak<Inner<Id>>,
    path: ResourcePath,
    id: Id,
    kind: GuardKind,
    confirmed: bool,
}

impl<Id> Guard<Id> {
    /// commit this lock's version effect. the lock is still released on
    /// drop; `confirm` only decides whether `up_to_date` is updated.
    pub fn confirm(mut self) {
        self.confirmed = true;
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }
}

impl<Id: Clone + Eq + Hash> Drop for Guard<Id> {
    fn drop(&mut self) {
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let mut states = inner.states.lock();

        match self.kind {
            GuardKind::Read => {
                if let Some(state) = states.get_mut(&self.path) {
                    state.read_holders.remove(&self.id);
                }
                if self.confirmed {
                    states
                        .entry(self.path.clone())
                        .or_default()
                        .up_to_date
                        .insert(self.id.clone());
                }
            }
            GuardKind::Write => {
                if let Some(state) = states.get_mut(&self.path) {
                    state.write_holder = None;
                }
                if self.confirmed {
                    let state = states.entry(self.path.clone()).or_default();
                    state.up_to_date.clear();
                    state.up_to_date.insert(self.id.clone());
                }
            }
            GuardKind::Delete => {
                if self.confirmed {
                    states.remove(&self.path);
                } else if let Some(state) = states.get_mut(&self.path) {
                    state.write_holder = None;
                }
            }
        }
    }
}
