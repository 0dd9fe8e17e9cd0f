use std::sync::Arc;

use sched_schema::{CommandId, SessionId};

use crate::store::{keys, KeyValueStore, Score, StoreError};

/// Per-session index of in-flight commands by due-score.
#[derive(Clone)]
pub struct CompletionTracker {
    store: Arc<dyn KeyValueStore>,
}

impl CompletionTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn track(
        &self,
        session: &SessionId,
        command: &CommandId,
        score: Score,
    ) -> Result<(), StoreError> {
        self.store
            .sorted_add(&keys::due(session), command.as_str(), score)
    }

    /// Tracked commands with `score <= threshold`, earliest first.
    pub fn due_before(
        &self,
        session: &SessionId,
        threshold: Score,
    ) -> Result<Vec<(CommandId, Score)>, StoreError> {
        Ok(self
            .store
            .sorted_range_by_score(&keys::due(session), threshold)?
            .into_iter()
            .map(|(member, score)| (CommandId::from(member), score))
            .collect())
    }

    /// Returns `false` when the command was not tracked, which means some
    /// other poller already took it.
    pub fn untrack(&self, session: &SessionId, command: &CommandId) -> Result<bool, StoreError> {
        self.store
            .sorted_remove(&keys::due(session), command.as_str())
    }

    /// Moves every due-score by `delta`, never below zero.
    pub fn shift_all(&self, session: &SessionId, delta: Score) -> Result<usize, StoreError> {
        self.store.sorted_shift(&keys::due(session), delta, 0)
    }

    pub fn score(
        &self,
        session: &SessionId,
        command: &CommandId,
    ) -> Result<Option<Score>, StoreError> {
        self.store.sorted_score(&keys::due(session), command.as_str())
    }

    pub fn entries(&self, session: &SessionId) -> Result<Vec<(CommandId, Score)>, StoreError> {
        Ok(self
            .store
            .sorted_entries(&keys::due(session))?
            .into_iter()
            .map(|(member, score)| (CommandId::from(member), score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tracker_with(entries: &[(&str, Score)]) -> (CompletionTracker, SessionId) {
        let tracker = CompletionTracker::new(Arc::new(MemoryStore::new()));
        let session = SessionId::from("S1");
        for (id, score) in entries {
            tracker
                .track(&session, &CommandId::from(*id), *score)
                .unwrap();
        }
        (tracker, session)
    }

    fn scores(tracker: &CompletionTracker, session: &SessionId) -> Vec<(String, Score)> {
        tracker
            .entries(session)
            .unwrap()
            .into_iter()
            .map(|(id, score)| (id.0, score))
            .collect()
    }

    #[test]
    fn due_before_is_inclusive_and_ordered() {
        let (tracker, session) = tracker_with(&[("late", 30), ("first", 10), ("edge", 20)]);
        assert_eq!(
            tracker.due_before(&session, 20).unwrap(),
            vec![(CommandId::from("first"), 10), (CommandId::from("edge"), 20)]
        );
        assert!(tracker.due_before(&session, 9).unwrap().is_empty());
    }

    #[test]
    fn accelerate_and_delay_shift_every_entry() {
        let (tracker, session) = tracker_with(&[("c1", 8), ("c2", 9)]);
        tracker.shift_all(&session, -2).unwrap();
        assert_eq!(
            scores(&tracker, &session),
            vec![("c1".to_string(), 6), ("c2".to_string(), 7)]
        );

        let (tracker, session) = tracker_with(&[("c1", 8), ("c2", 9)]);
        tracker.shift_all(&session, 2).unwrap();
        assert_eq!(
            scores(&tracker, &session),
            vec![("c1".to_string(), 10), ("c2".to_string(), 11)]
        );
    }

    #[test]
    fn shift_never_goes_below_zero() {
        let (tracker, session) = tracker_with(&[("c1", 1), ("c2", 3)]);
        tracker.shift_all(&session, -5).unwrap();
        assert_eq!(
            scores(&tracker, &session),
            vec![("c1".to_string(), 0), ("c2".to_string(), 0)]
        );
    }

    #[test]
    fn untrack_reports_whether_entry_existed() {
        let (tracker, session) = tracker_with(&[("c1", 1)]);
        assert!(tracker.untrack(&session, &CommandId::from("c1")).unwrap());
        assert!(!tracker.untrack(&session, &CommandId::from("c1")).unwrap());
        assert_eq!(tracker.score(&session, &CommandId::from("c1")).unwrap(), None);
    }
}
