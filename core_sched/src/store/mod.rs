//! Access to the shared atomic store that holds every piece of scheduler
//! state: execution queues, current pointers, completion trackers, turn
//! counters and the execution stream.
//!
//! Every method on [`KeyValueStore`] and [`StreamTransport`] maps to one
//! server-side primitive and must be atomic on its own. Scheduling logic never
//! reads a value and writes it back across two calls.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

mod memory;

pub mod keys;

pub use memory::MemoryStore;

/// Due-score stored in a sorted set: epoch milliseconds or a turn number.
pub type Score = i64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("key {key} holds a {found} value, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("value at {key} is not an integer: {value}")]
    NotAnInteger { key: String, value: String },
    #[error("consumer group {group} does not exist on stream {stream}")]
    NoSuchGroup { stream: String, group: String },
}

/// Atomic key/value, list and sorted-set primitives.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns `true` when the key was absent and has been written.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes `key` only while it still holds `expected`.
    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Increments an integer key, treating a missing key as 0.
    fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Increments `key` only while it still holds `expected`. Returns the new
    /// value, or `None` when the key held something else or was missing.
    fn increment_if_equals(&self, key: &str, expected: i64) -> Result<Option<i64>, StoreError>;

    /// Appends to the tail of a list and returns the new length.
    fn push_back(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Pops the head of `list_key` and writes it to `pointer_key` in one step.
    ///
    /// Nothing is popped while `pointer_key` is already set. Empty lists are
    /// removed so that key scans only see lists with pending items.
    fn pop_front_into(
        &self,
        list_key: &str,
        pointer_key: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Inserts or updates `member`. An update keeps the member's original
    /// insertion position for tie-breaking.
    fn sorted_add(&self, key: &str, member: &str, score: Score) -> Result<(), StoreError>;

    /// Members with `score <= max`, ascending by score then insertion order.
    fn sorted_range_by_score(
        &self,
        key: &str,
        max: Score,
    ) -> Result<Vec<(String, Score)>, StoreError>;

    fn sorted_score(&self, key: &str, member: &str) -> Result<Option<Score>, StoreError>;

    fn sorted_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Replaces every score with `max(floor, score + delta)` and returns the
    /// number of members touched.
    fn sorted_shift(&self, key: &str, delta: Score, floor: Score) -> Result<usize, StoreError>;

    /// Moves `value` from `pointer_key` back to the head of `list_key`, but
    /// only while the pointer still holds it.
    fn restore_front(
        &self,
        pointer_key: &str,
        list_key: &str,
        value: &str,
    ) -> Result<bool, StoreError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    fn sorted_entries(&self, key: &str) -> Result<Vec<(String, Score)>, StoreError> {
        self.sorted_range_by_score(key, Score::MAX)
    }
}

/// Position of an entry in a stream, ordered by creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub millis: u64,
    pub seq: u64,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

/// An entry handed to a consumer, with how often it has been delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: MessageId,
    pub body: Vec<u8>,
    pub delivery_count: u32,
}

/// Delivered but not yet acknowledged entry of a consumer group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: MessageId,
    pub consumer: String,
    pub idle: Duration,
    pub delivery_count: u32,
}

/// Append-only log with consumer groups and at-least-once delivery.
pub trait StreamTransport: Send + Sync {
    fn append(&self, stream: &str, body: &[u8]) -> Result<MessageId, StoreError>;

    /// Creates the group (and the stream) when missing. Returns `false` if the
    /// group already existed. New groups start at the beginning of the log.
    fn create_group(&self, stream: &str, group: &str) -> Result<bool, StoreError>;

    /// Delivers up to `count` never-delivered entries to `consumer`, waiting
    /// at most `block` for the first one to arrive.
    fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    fn ack(&self, stream: &str, group: &str, ids: &[MessageId]) -> Result<usize, StoreError>;

    fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StoreError>;

    /// Moves pending entries idle for at least `min_idle` to `consumer`,
    /// bumping their delivery count. Entries that are not idle long enough
    /// are left alone.
    fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[MessageId],
    ) -> Result<Vec<StreamEntry>, StoreError>;
}
