use std::sync::Arc;

use sched_schema::Session;

use crate::store::{keys, KeyValueStore, StoreError};

/// Shared turn clock of turn-based sessions.
///
/// The counter lives in the store so that every scheduler process sees the
/// same turn. It is seeded from the session record the first time it is used.
#[derive(Clone)]
pub struct TurnCounter {
    store: Arc<dyn KeyValueStore>,
}

impl TurnCounter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn current(&self, session: &Session) -> Result<u64, StoreError> {
        let key = keys::turn(&session.id);
        match self.store.get(&key)? {
            Some(raw) => parse_turn(&key, raw),
            None => Ok(session.current_turn),
        }
    }

    /// Atomically moves the session to its next turn and returns it.
    pub fn increment(&self, session: &Session) -> Result<u64, StoreError> {
        let key = self.seeded(session)?;
        let next = self.store.increment(&key)?;
        Ok(next.max(0) as u64)
    }

    /// Moves to the next turn only if the counter still reads
    /// `session.current_turn`. `None` means another scheduler already moved
    /// past the turn this snapshot saw.
    pub fn advance_from(&self, session: &Session) -> Result<Option<u64>, StoreError> {
        let key = self.seeded(session)?;
        let next = self
            .store
            .increment_if_equals(&key, session.current_turn as i64)?;
        Ok(next.map(|turn| turn.max(0) as u64))
    }

    fn seeded(&self, session: &Session) -> Result<String, StoreError> {
        let key = keys::turn(&session.id);
        self.store
            .set_if_absent(&key, &session.current_turn.to_string())?;
        Ok(key)
    }
}

fn parse_turn(key: &str, raw: String) -> Result<u64, StoreError> {
    raw.parse::<u64>().map_err(|_| StoreError::NotAnInteger {
        key: key.to_string(),
        value: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn counter_seeds_from_session_record() {
        let counter = TurnCounter::new(Arc::new(MemoryStore::new()));
        let mut session = Session::turn_based("S1", 60);
        session.current_turn = 7;

        assert_eq!(counter.current(&session).unwrap(), 7);
        assert_eq!(counter.increment(&session).unwrap(), 8);
        assert_eq!(counter.increment(&session).unwrap(), 9);
        assert_eq!(counter.current(&session).unwrap(), 9);
    }

    #[test]
    fn advance_from_refuses_a_stale_snapshot() {
        let counter = TurnCounter::new(Arc::new(MemoryStore::new()));
        let mut session = Session::turn_based("S1", 60);
        session.current_turn = 3;

        assert_eq!(counter.advance_from(&session).unwrap(), Some(4));
        assert_eq!(counter.advance_from(&session).unwrap(), None);

        session.current_turn = 4;
        assert_eq!(counter.advance_from(&session).unwrap(), Some(5));
    }
}
