//! Bounded, identity-indexed registry of live façade instances.
//!
//! Each registry tracks one kind of façade per application identity so that
//! repeated calls from the same caller reuse the existing instance instead of
//! opening a new transport session. Every operation, including compound
//! find-then-mutate sequences, runs as a single critical section under one
//! lock.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Default maximum number of entries per registry.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 100;

/// Kind of façade tracked by a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacadeKind {
    Subscriber,
    Publisher,
    Consumer,
    Requestor,
    Responder,
}

impl FacadeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscriber => "subscriber",
            Self::Publisher => "publisher",
            Self::Consumer => "consumer",
            Self::Requestor => "requestor",
            Self::Responder => "responder",
        }
    }
}

impl std::fmt::Display for FacadeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entries stored in a [`BoundedRegistry`] expose the owning application id.
pub trait Identified {
    fn app_id(&self) -> &str;
}

/// Result of a find-or-create lookup.
#[derive(Debug)]
pub enum Registration<T> {
    /// An entry for the application already existed
    Existing(Arc<T>),
    /// A new entry was created and stored
    Created(Arc<T>),
}

impl<T> Registration<T> {
    /// The registered entry, regardless of whether it was just created
    pub fn entry(&self) -> &Arc<T> {
        match self {
            Self::Existing(entry) | Self::Created(entry) => entry,
        }
    }

    pub fn into_entry(self) -> Arc<T> {
        match self {
            Self::Existing(entry) | Self::Created(entry) => entry,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Capacity-limited ordered collection keyed by application identity.
pub struct BoundedRegistry<T> {
    kind: FacadeKind,
    capacity: usize,
    entries: Mutex<Vec<Arc<T>>>,
}

impl<T: Identified> BoundedRegistry<T> {
    /// Create an empty registry holding at most `capacity` entries
    pub fn new(kind: FacadeKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> FacadeKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry. Returns `false` and drops the entry once the
    /// registry is at capacity.
    pub async fn push(&self, entry: Arc<T>) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            warn!(
                kind = %self.kind,
                app_id = %entry.app_id(),
                capacity = self.capacity,
                "Registry at capacity, entry rejected"
            );
            return false;
        }

        entries.push(entry);
        true
    }

    /// Remove and return the most recently added entry
    pub async fn pop(&self) -> Option<Arc<T>> {
        self.entries.lock().await.pop()
    }

    pub async fn find_by_app_id(&self, app_id: &str) -> Option<Arc<T>> {
        let entries = self.entries.lock().await;
        entries.iter().find(|e| e.app_id() == app_id).cloned()
    }

    pub async fn index_by_app_id(&self, app_id: &str) -> Option<usize> {
        let entries = self.entries.lock().await;
        entries.iter().position(|e| e.app_id() == app_id)
    }

    /// Remove `count` entries starting at `index`, clamped to the current size
    pub async fn splice_at(&self, index: usize, count: usize) -> Vec<Arc<T>> {
        let mut entries = self.entries.lock().await;
        if index >= entries.len() {
            return Vec::new();
        }
        let end = index.saturating_add(count).min(entries.len());
        entries.drain(index..end).collect()
    }

    /// Find the entry for `app_id` and remove it in one critical section
    pub async fn remove_by_app_id(&self, app_id: &str) -> Option<Arc<T>> {
        let mut entries = self.entries.lock().await;
        let index = entries.iter().position(|e| e.app_id() == app_id)?;
        Some(entries.remove(index))
    }

    /// Remove `entry` itself, leaving any other entry for the same
    /// application in place
    pub async fn remove_entry(&self, entry: &Arc<T>) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.iter().position(|e| Arc::ptr_eq(e, entry)) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Return the entry for `app_id`, creating and storing it when absent.
    ///
    /// Fails with [`GatewayError::RegistryFull`] when a new entry is needed
    /// and the registry is at capacity; `create` is not called in that case.
    pub async fn find_or_insert_with<F>(
        &self,
        app_id: &str,
        create: F,
    ) -> Result<Registration<T>, GatewayError>
    where
        F: FnOnce() -> Arc<T>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.iter().find(|e| e.app_id() == app_id) {
            return Ok(Registration::Existing(existing.clone()));
        }

        if entries.len() >= self.capacity {
            warn!(kind = %self.kind, app_id = %app_id, "Registry at capacity, request shed");
            return Err(self.full_error());
        }

        let entry = create();
        entries.push(entry.clone());
        Ok(Registration::Created(entry))
    }

    /// Replace the entry for `app_id` with a freshly created one.
    ///
    /// Returns the new entry and the displaced one, if any. A replacement
    /// keeps the entry's position; an insertion is subject to capacity.
    pub async fn replace_with<F>(
        &self,
        app_id: &str,
        create: F,
    ) -> Result<(Arc<T>, Option<Arc<T>>), GatewayError>
    where
        F: FnOnce() -> Arc<T>,
    {
        let mut entries = self.entries.lock().await;
        match entries.iter().position(|e| e.app_id() == app_id) {
            Some(index) => {
                let entry = create();
                let previous = std::mem::replace(&mut entries[index], entry.clone());
                Ok((entry, Some(previous)))
            }
            None => {
                if entries.len() >= self.capacity {
                    return Err(self.full_error());
                }
                let entry = create();
                entries.push(entry.clone());
                Ok((entry, None))
            }
        }
    }

    /// Copy of the current entries in insertion order
    pub async fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.lock().await.clone()
    }

    /// Remove and return every entry
    pub async fn drain(&self) -> Vec<Arc<T>> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn full_error(&self) -> GatewayError {
        GatewayError::RegistryFull {
            kind: self.kind,
            capacity: self.capacity,
        }
    }
}
