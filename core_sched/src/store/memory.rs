use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::ops::Bound;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

use super::{
    KeyValueStore, MessageId, PendingEntry, Score, StoreError, StreamEntry, StreamTransport,
};

/// In-process store with the same atomicity as a single-threaded key/value
/// server: every primitive runs under one lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    appended: Condvar,
}

#[derive(Default)]
struct State {
    values: HashMap<String, Value>,
    streams: HashMap<String, Stream>,
    insertion_seq: u64,
    failures_remaining: u32,
    op_failures: HashMap<&'static str, u32>,
}

enum Value {
    Text(String),
    List(VecDeque<String>),
    Sorted(SortedSet),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "string",
            Value::List(_) => "list",
            Value::Sorted(_) => "sorted set",
        }
    }
}

#[derive(Default)]
struct SortedSet {
    order: BTreeSet<(Score, u64, String)>,
    members: HashMap<String, (Score, u64)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: Score, fresh_seq: u64) {
        let seq = match self.members.get(member).copied() {
            Some((old_score, seq)) => {
                self.order.remove(&(old_score, seq, member.to_string()));
                seq
            }
            None => fresh_seq,
        };
        self.order.insert((score, seq, member.to_string()));
        self.members.insert(member.to_string(), (score, seq));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.members.remove(member) {
            Some((score, seq)) => self.order.remove(&(score, seq, member.to_string())),
            None => false,
        }
    }

    fn range(&self, max: Score) -> Vec<(String, Score)> {
        self.order
            .iter()
            .take_while(|(score, _, _)| *score <= max)
            .map(|(score, _, member)| (member.clone(), *score))
            .collect()
    }

    fn shift(&mut self, delta: Score, floor: Score) -> usize {
        let shifted: BTreeSet<(Score, u64, String)> = self
            .order
            .iter()
            .map(|(score, seq, member)| (score.saturating_add(delta).max(floor), *seq, member.clone()))
            .collect();
        for (score, seq, member) in &shifted {
            self.members.insert(member.clone(), (*score, *seq));
        }
        self.order = shifted;
        self.members.len()
    }
}

#[derive(Default)]
struct Stream {
    entries: BTreeMap<MessageId, Vec<u8>>,
    last_id: Option<MessageId>,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct Group {
    last_delivered: Option<MessageId>,
    pending: BTreeMap<MessageId, PendingState>,
}

struct PendingState {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

fn wrong_type(key: &str, expected: &'static str, found: &Value) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

fn no_such_group(stream: &str, group: &str) -> StoreError {
    StoreError::NoSuchGroup {
        stream: stream.to_string(),
        group: group.to_string(),
    }
}

impl State {
    fn check_available(&mut self, op: &'static str) -> Result<(), StoreError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        if let Some(left) = self.op_failures.get_mut(op) {
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Unavailable(format!("injected {op} failure")));
            }
        }
        Ok(())
    }

    fn next_insertion_seq(&mut self) -> u64 {
        self.insertion_seq += 1;
        self.insertion_seq
    }

    fn text(&self, key: &str) -> Result<Option<&String>, StoreError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text)),
            Some(other) => Err(wrong_type(key, "string", other)),
        }
    }

    fn list(&self, key: &str) -> Result<Option<&VecDeque<String>>, StoreError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(Some(list)),
            Some(other) => Err(wrong_type(key, "list", other)),
        }
    }

    fn sorted(&self, key: &str) -> Result<Option<&SortedSet>, StoreError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Sorted(set)) => Ok(Some(set)),
            Some(other) => Err(wrong_type(key, "sorted set", other)),
        }
    }

    fn sorted_mut(&mut self, key: &str) -> Result<Option<&mut SortedSet>, StoreError> {
        match self.values.get_mut(key) {
            None => Ok(None),
            Some(Value::Sorted(set)) => Ok(Some(set)),
            Some(other) => Err(wrong_type(key, "sorted set", other)),
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.values.get(key) {
            Some(Value::List(list)) => list.is_empty(),
            Some(Value::Sorted(set)) => set.members.is_empty(),
            _ => false,
        };
        if empty {
            self.values.remove(key);
        }
    }

    fn next_message_id(stream: &Stream) -> MessageId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        match stream.last_id {
            Some(last) if millis <= last.millis => MessageId {
                millis: last.millis,
                seq: last.seq + 1,
            },
            _ => MessageId { millis, seq: 0 },
        }
    }

    fn deliver_new(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let Stream {
            entries, groups, ..
        } = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| no_such_group(stream, group))?;
        let group_state = groups
            .get_mut(group)
            .ok_or_else(|| no_such_group(stream, group))?;

        let lower = match group_state.last_delivered {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let now = Instant::now();
        let mut delivered = Vec::new();
        for (id, body) in entries.range((lower, Bound::Unbounded)).take(count) {
            group_state.pending.insert(
                *id,
                PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            delivered.push(StreamEntry {
                id: *id,
                body: body.clone(),
                delivery_count: 1,
            });
        }
        if let Some(last) = delivered.last() {
            group_state.last_delivered = Some(last.id);
        }
        Ok(delivered)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `operations` calls fail with [`StoreError::Unavailable`].
    /// Used for outage drills against a running scheduler.
    pub fn fail_next(&self, operations: u32) {
        self.state.lock().failures_remaining = operations;
    }

    /// Makes the next `times` calls of one primitive fail, e.g. `"append"`
    /// or `"delete_if_equals"`. Other primitives keep working.
    pub fn fail_next_op(&self, op: &'static str, times: u32) {
        self.state.lock().op_failures.insert(op, times);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("get")?;
        Ok(state.text(key)?.cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check_available("set")?;
        state.text(key)?;
        state
            .values
            .insert(key.to_string(), Value::Text(value.to_string()));
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_available("set_if_absent")?;
        if state.values.contains_key(key) {
            return Ok(false);
        }
        state
            .values
            .insert(key.to_string(), Value::Text(value.to_string()));
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_available("delete")?;
        Ok(state.values.remove(key).is_some())
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_available("delete_if_equals")?;
        if state.text(key)?.map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        state.values.remove(key);
        Ok(true)
    }

    fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut state = self.state.lock();
        state.check_available("increment")?;
        let current = match state.text(key)? {
            None => 0,
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                key: key.to_string(),
                value: raw.clone(),
            })?,
        };
        let next = current + 1;
        state
            .values
            .insert(key.to_string(), Value::Text(next.to_string()));
        Ok(next)
    }

    fn increment_if_equals(&self, key: &str, expected: i64) -> Result<Option<i64>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("increment_if_equals")?;
        let Some(raw) = state.text(key)? else {
            return Ok(None);
        };
        let current = raw.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
            key: key.to_string(),
            value: raw.clone(),
        })?;
        if current != expected {
            return Ok(None);
        }
        let next = current + 1;
        state
            .values
            .insert(key.to_string(), Value::Text(next.to_string()));
        Ok(Some(next))
    }

    fn push_back(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        state.check_available("push_back")?;
        let slot = state
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        match slot {
            Value::List(list) => {
                list.push_back(value.to_string());
                Ok(list.len())
            }
            other => Err(wrong_type(key, "list", other)),
        }
    }

    fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        state.check_available("list_len")?;
        Ok(state.list(key)?.map_or(0, VecDeque::len))
    }

    fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("list_range")?;
        Ok(state
            .list(key)?
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn pop_front_into(
        &self,
        list_key: &str,
        pointer_key: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("pop_front_into")?;
        if state.text(pointer_key)?.is_some() {
            return Ok(None);
        }
        let popped = match state.values.get_mut(list_key) {
            None => None,
            Some(Value::List(list)) => list.pop_front(),
            Some(other) => return Err(wrong_type(list_key, "list", other)),
        };
        state.drop_if_empty(list_key);
        if let Some(head) = &popped {
            state
                .values
                .insert(pointer_key.to_string(), Value::Text(head.clone()));
        }
        Ok(popped)
    }

    fn restore_front(
        &self,
        pointer_key: &str,
        list_key: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_available("restore_front")?;
        if state.text(pointer_key)?.map(String::as_str) != Some(value) {
            return Ok(false);
        }
        state.list(list_key)?;
        state.values.remove(pointer_key);
        let slot = state
            .values
            .entry(list_key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        if let Value::List(list) = slot {
            list.push_front(value.to_string());
        }
        Ok(true)
    }

    fn sorted_add(&self, key: &str, member: &str, score: Score) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check_available("sorted_add")?;
        let seq = state.next_insertion_seq();
        let slot = state
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Sorted(SortedSet::default()));
        match slot {
            Value::Sorted(set) => {
                set.insert(member, score, seq);
                Ok(())
            }
            other => Err(wrong_type(key, "sorted set", other)),
        }
    }

    fn sorted_range_by_score(
        &self,
        key: &str,
        max: Score,
    ) -> Result<Vec<(String, Score)>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("sorted_range_by_score")?;
        Ok(state
            .sorted(key)?
            .map(|set| set.range(max))
            .unwrap_or_default())
    }

    fn sorted_score(&self, key: &str, member: &str) -> Result<Option<Score>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("sorted_score")?;
        Ok(state
            .sorted(key)?
            .and_then(|set| set.members.get(member))
            .map(|(score, _)| *score))
    }

    fn sorted_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_available("sorted_remove")?;
        let removed = match state.sorted_mut(key)? {
            Some(set) => set.remove(member),
            None => false,
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    fn sorted_shift(&self, key: &str, delta: Score, floor: Score) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        state.check_available("sorted_shift")?;
        Ok(match state.sorted_mut(key)? {
            Some(set) => set.shift(delta, floor),
            None => 0,
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("keys_with_prefix")?;
        let mut keys: Vec<String> = state
            .values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl StreamTransport for MemoryStore {
    fn append(&self, stream: &str, body: &[u8]) -> Result<MessageId, StoreError> {
        let mut state = self.state.lock();
        state.check_available("append")?;
        let log = state.streams.entry(stream.to_string()).or_default();
        let id = State::next_message_id(log);
        log.entries.insert(id, body.to_vec());
        log.last_id = Some(id);
        drop(state);
        self.appended.notify_all();
        Ok(id)
    }

    fn create_group(&self, stream: &str, group: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.check_available("create_group")?;
        let log = state.streams.entry(stream.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Ok(false);
        }
        log.groups.insert(group.to_string(), Group::default());
        Ok(true)
    }

    fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let deadline = Instant::now() + block;
        let mut state = self.state.lock();
        state.check_available("read_group")?;
        loop {
            let delivered = state.deliver_new(stream, group, consumer, count)?;
            if !delivered.is_empty() {
                return Ok(delivered);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            self.appended.wait_for(&mut state, deadline - now);
        }
    }

    fn ack(&self, stream: &str, group: &str, ids: &[MessageId]) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        state.check_available("ack")?;
        let group_state = state
            .streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
            .ok_or_else(|| no_such_group(stream, group))?;
        Ok(ids
            .iter()
            .filter(|id| group_state.pending.remove(id).is_some())
            .count())
    }

    fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("pending")?;
        let group_state = state
            .streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .ok_or_else(|| no_such_group(stream, group))?;
        let now = Instant::now();
        Ok(group_state
            .pending
            .iter()
            .map(|(id, entry)| PendingEntry {
                id: *id,
                consumer: entry.consumer.clone(),
                idle: now.saturating_duration_since(entry.delivered_at),
                delivery_count: entry.delivery_count,
            })
            .collect())
    }

    fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[MessageId],
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut state = self.state.lock();
        state.check_available("claim")?;
        let Stream {
            entries, groups, ..
        } = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| no_such_group(stream, group))?;
        let group_state = groups
            .get_mut(group)
            .ok_or_else(|| no_such_group(stream, group))?;

        let now = Instant::now();
        let mut claimed = Vec::new();
        for id in ids {
            let Some(pending) = group_state.pending.get_mut(id) else {
                continue;
            };
            if now.saturating_duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            let Some(body) = entries.get(id) else {
                group_state.pending.remove(id);
                continue;
            };
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.delivery_count += 1;
            claimed.push(StreamEntry {
                id: *id,
                body: body.clone(),
                delivery_count: pending.delivery_count,
            });
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_front_into_waits_for_pointer_to_clear() {
        let store = MemoryStore::new();
        store.push_back("q", "c1").unwrap();
        store.push_back("q", "c2").unwrap();

        assert_eq!(store.pop_front_into("q", "cur").unwrap(), Some("c1".into()));
        assert_eq!(store.pop_front_into("q", "cur").unwrap(), None);
        assert_eq!(store.list_len("q").unwrap(), 1);

        assert!(store.delete_if_equals("cur", "c1").unwrap());
        assert_eq!(store.pop_front_into("q", "cur").unwrap(), Some("c2".into()));
        assert!(store.keys_with_prefix("q").unwrap().is_empty());
    }

    #[test]
    fn delete_if_equals_leaves_other_values() {
        let store = MemoryStore::new();
        store.set("cur", "c2").unwrap();
        assert!(!store.delete_if_equals("cur", "c1").unwrap());
        assert_eq!(store.get("cur").unwrap(), Some("c2".into()));
    }

    #[test]
    fn sorted_range_orders_ties_by_insertion() {
        let store = MemoryStore::new();
        store.sorted_add("due", "b", 5).unwrap();
        store.sorted_add("due", "a", 5).unwrap();
        store.sorted_add("due", "c", 3).unwrap();
        store.sorted_add("due", "late", 9).unwrap();
        store.sorted_add("due", "b", 5).unwrap();

        let due: Vec<String> = store
            .sorted_range_by_score("due", 5)
            .unwrap()
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        assert_eq!(due, vec!["c", "b", "a"]);
    }

    #[test]
    fn sorted_shift_clamps_at_floor() {
        let store = MemoryStore::new();
        store.sorted_add("due", "c1", 1).unwrap();
        store.sorted_add("due", "c2", 4).unwrap();
        assert_eq!(store.sorted_shift("due", -3, 0).unwrap(), 2);
        assert_eq!(store.sorted_score("due", "c1").unwrap(), Some(0));
        assert_eq!(store.sorted_score("due", "c2").unwrap(), Some(1));
    }

    #[test]
    fn wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert!(matches!(
            store.push_back("k", "x"),
            Err(StoreError::WrongType { found: "string", .. })
        ));
        assert!(matches!(
            store.increment("k"),
            Err(StoreError::NotAnInteger { .. })
        ));
    }

    #[test]
    fn injected_outage_fails_exact_number_of_calls() {
        let store = MemoryStore::new();
        store.fail_next(2);
        assert!(matches!(store.get("k"), Err(StoreError::Unavailable(_))));
        assert!(matches!(store.increment("k"), Err(StoreError::Unavailable(_))));
        assert_eq!(store.increment("k").unwrap(), 1);
    }

    #[test]
    fn op_failure_only_hits_the_named_primitive() {
        let store = MemoryStore::new();
        store.set("cur", "c1").unwrap();
        store.fail_next_op("delete_if_equals", 1);
        assert_eq!(store.get("cur").unwrap(), Some("c1".into()));
        assert!(matches!(
            store.delete_if_equals("cur", "c1"),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.delete_if_equals("cur", "c1").unwrap());
    }

    #[test]
    fn increment_if_equals_only_moves_from_expected_value() {
        let store = MemoryStore::new();
        assert_eq!(store.increment_if_equals("turn", 0).unwrap(), None);
        store.set("turn", "4").unwrap();
        assert_eq!(store.increment_if_equals("turn", 3).unwrap(), None);
        assert_eq!(store.increment_if_equals("turn", 4).unwrap(), Some(5));
        assert_eq!(store.increment_if_equals("turn", 4).unwrap(), None);
        assert_eq!(store.get("turn").unwrap(), Some("5".into()));
    }

    #[test]
    fn restore_front_returns_pointer_value_to_queue_head() {
        let store = MemoryStore::new();
        store.push_back("q", "c1").unwrap();
        store.push_back("q", "c2").unwrap();
        store.pop_front_into("q", "cur").unwrap();

        assert!(!store.restore_front("cur", "q", "other").unwrap());
        assert!(store.restore_front("cur", "q", "c1").unwrap());
        assert_eq!(store.get("cur").unwrap(), None);
        assert_eq!(store.list_range("q").unwrap(), vec!["c1", "c2"]);

        store.pop_front_into("q", "cur").unwrap();
        store.pop_front_into("q", "other").unwrap();
        assert!(store.restore_front("cur", "q", "c1").unwrap());
        assert_eq!(store.list_range("q").unwrap(), vec!["c1"]);
    }

    #[test]
    fn group_delivers_each_entry_once_and_tracks_pending() {
        let store = MemoryStore::new();
        assert!(store.create_group("s", "g").unwrap());
        assert!(!store.create_group("s", "g").unwrap());
        let first = store.append("s", b"one").unwrap();
        let second = store.append("s", b"two").unwrap();
        assert!(first < second);

        let batch = store
            .read_group("s", "g", "w1", 10, Duration::ZERO)
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert!(store
            .read_group("s", "g", "w2", 10, Duration::ZERO)
            .unwrap()
            .is_empty());

        assert_eq!(store.ack("s", "g", &[first]).unwrap(), 1);
        let pending = store.pending("s", "g").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second);
        assert_eq!(pending[0].consumer, "w1");
    }

    #[test]
    fn claim_bumps_delivery_count_and_owner() {
        let store = MemoryStore::new();
        store.create_group("s", "g").unwrap();
        let id = store.append("s", b"body").unwrap();
        store.read_group("s", "g", "w1", 1, Duration::ZERO).unwrap();

        let held = store
            .claim("s", "g", "w2", Duration::from_secs(60), &[id])
            .unwrap();
        assert!(held.is_empty());

        let claimed = store.claim("s", "g", "w2", Duration::ZERO, &[id]).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].delivery_count, 2);
        assert_eq!(store.pending("s", "g").unwrap()[0].consumer, "w2");
    }

    #[test]
    fn blocking_read_times_out_empty() {
        let store = MemoryStore::new();
        store.create_group("s", "g").unwrap();
        let started = Instant::now();
        let batch = store
            .read_group("s", "g", "w1", 10, Duration::from_millis(30))
            .unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn read_without_group_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read_group("s", "g", "w1", 1, Duration::ZERO),
            Err(StoreError::NoSuchGroup { .. })
        ));
    }
}
