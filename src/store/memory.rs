//! In-process store for tests and single-process development.
//!
//! Same primitives and semantics as Redis lists and hashes. Lists are
//! `VecDeque`s with the head at the front. The availability switch makes
//! every call fail with `StoreUnavailable`, simulating an outage.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{Error, Result};

use super::Store;

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    maps: HashMap<String, HashMap<String, String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Woken on every push so blocked moves can retry.
    pushed: Notify,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the simulated outage.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
        if available {
            self.pushed.notify_waiters();
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T> {
        self.check_available()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))?;
        Ok(f(&mut state))
    }

    fn try_move(&self, src: &str, dst: &str) -> Result<Option<String>> {
        self.with_state(|state| {
            let blob = state.lists.get_mut(src)?.pop_back()?;
            state
                .lists
                .entry(dst.to_string())
                .or_default()
                .push_front(blob.clone());
            Some(blob)
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn atomic_move(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(blob) = self.try_move(src, dst)? {
                return Ok(Some(blob));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn push_head(&self, seq: &str, blob: &str) -> Result<()> {
        self.with_state(|state| {
            state
                .lists
                .entry(seq.to_string())
                .or_default()
                .push_front(blob.to_string());
        })?;
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn remove_one(&self, seq: &str, blob: &str) -> Result<usize> {
        self.with_state(|state| {
            let Some(list) = state.lists.get_mut(seq) else {
                return 0;
            };
            match list.iter().position(|entry| entry == blob) {
                Some(index) => {
                    list.remove(index);
                    1
                }
                None => 0,
            }
        })
    }

    async fn range(&self, seq: &str) -> Result<Vec<String>> {
        self.with_state(|state| {
            state
                .lists
                .get(seq)
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn len(&self, seq: &str) -> Result<usize> {
        self.with_state(|state| state.lists.get(seq).map_or(0, VecDeque::len))
    }

    async fn map_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.with_state(|state| {
            state
                .maps
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
        })
    }

    async fn map_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_state(|state| state.maps.get(key).cloned().unwrap_or_default())
    }

    async fn map_delete(&self, key: &str) -> Result<()> {
        self.with_state(|state| {
            state.maps.remove(key);
        })
    }
}
