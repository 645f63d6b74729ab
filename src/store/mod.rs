//! Backing store adapter.
//!
//! The queue needs only a handful of atomic primitives over named sequences
//! (lists) and maps (hashes). Each call is one indivisible store operation;
//! there are no transactions spanning calls.
//!
//! Sequences have a head and a tail. Producers push at the head and workers
//! pop from the tail, which makes a sequence FIFO.

pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Pop from the tail of `src` and push onto the head of `dst` in one step.
    /// Blocks up to `timeout` while `src` is empty; returns `None` if nothing arrived.
    async fn atomic_move(&self, src: &str, dst: &str, timeout: Duration)
    -> Result<Option<String>>;

    /// Push a blob onto the head of a sequence.
    async fn push_head(&self, seq: &str, blob: &str) -> Result<()>;

    /// Remove one occurrence of `blob`. Returns how many were removed (0 or 1);
    /// removing an absent blob is not an error.
    async fn remove_one(&self, seq: &str, blob: &str) -> Result<usize>;

    /// Every entry of a sequence, head first.
    async fn range(&self, seq: &str) -> Result<Vec<String>>;

    /// Number of entries in a sequence. Missing sequences are empty.
    async fn len(&self, seq: &str) -> Result<usize>;

    async fn map_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// All fields of a map. Missing maps are empty.
    async fn map_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Delete a whole map. Deleting a missing map is not an error.
    async fn map_delete(&self, key: &str) -> Result<()>;
}
