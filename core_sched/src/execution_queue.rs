use std::sync::Arc;

use sched_schema::{ActorId, CommandId, SessionId};

use crate::store::{keys, KeyValueStore, StoreError};

/// Per-actor FIFO of commands waiting to run, plus the pointer to the one
/// that is running.
#[derive(Clone)]
pub struct ExecutionQueues {
    store: Arc<dyn KeyValueStore>,
}

impl ExecutionQueues {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Appends to the tail. Callers must not enqueue the same command twice.
    pub fn enqueue(
        &self,
        session: &SessionId,
        actor: &ActorId,
        command: &CommandId,
    ) -> Result<usize, StoreError> {
        self.store
            .push_back(&keys::queue(session, actor), command.as_str())
    }

    /// Pops the head and makes it the actor's current command in one store
    /// call. Returns `None` when the queue is empty or the actor is busy.
    pub fn dequeue_next(
        &self,
        session: &SessionId,
        actor: &ActorId,
    ) -> Result<Option<CommandId>, StoreError> {
        Ok(self
            .store
            .pop_front_into(&keys::queue(session, actor), &keys::current(session, actor))?
            .map(CommandId::from))
    }

    pub fn set_current(
        &self,
        session: &SessionId,
        actor: &ActorId,
        command: &CommandId,
    ) -> Result<(), StoreError> {
        self.store
            .set(&keys::current(session, actor), command.as_str())
    }

    /// Clears the pointer only if it still names `command`.
    pub fn clear_current(
        &self,
        session: &SessionId,
        actor: &ActorId,
        command: &CommandId,
    ) -> Result<bool, StoreError> {
        self.store
            .delete_if_equals(&keys::current(session, actor), command.as_str())
    }

    /// Puts a started command back at the head of its queue and frees the
    /// actor, as long as the pointer still names `command`.
    pub fn requeue_front(
        &self,
        session: &SessionId,
        actor: &ActorId,
        command: &CommandId,
    ) -> Result<bool, StoreError> {
        self.store.restore_front(
            &keys::current(session, actor),
            &keys::queue(session, actor),
            command.as_str(),
        )
    }

    pub fn current(
        &self,
        session: &SessionId,
        actor: &ActorId,
    ) -> Result<Option<CommandId>, StoreError> {
        Ok(self
            .store
            .get(&keys::current(session, actor))?
            .map(CommandId::from))
    }

    pub fn len(&self, session: &SessionId, actor: &ActorId) -> Result<usize, StoreError> {
        self.store.list_len(&keys::queue(session, actor))
    }

    pub fn pending(
        &self,
        session: &SessionId,
        actor: &ActorId,
    ) -> Result<Vec<CommandId>, StoreError> {
        Ok(self
            .store
            .list_range(&keys::queue(session, actor))?
            .into_iter()
            .map(CommandId::from)
            .collect())
    }

    /// Actors of `session` with at least one queued command.
    pub fn pending_actors(&self, session: &SessionId) -> Result<Vec<ActorId>, StoreError> {
        Ok(self
            .store
            .keys_with_prefix(&keys::queue_prefix(session))?
            .iter()
            .filter_map(|key| keys::actor_from_queue_key(session, key))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queues() -> ExecutionQueues {
        ExecutionQueues::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn dequeue_is_fifo_and_one_at_a_time() {
        let queues = queues();
        let session = SessionId::from("S1");
        let actor = ActorId::from("A1");
        for id in ["c1", "c2", "c3"] {
            queues
                .enqueue(&session, &actor, &CommandId::from(id))
                .unwrap();
        }

        let mut started = Vec::new();
        while let Some(next) = queues.dequeue_next(&session, &actor).unwrap() {
            assert_eq!(queues.current(&session, &actor).unwrap(), Some(next.clone()));
            assert_eq!(queues.dequeue_next(&session, &actor).unwrap(), None);
            assert!(queues.clear_current(&session, &actor, &next).unwrap());
            started.push(next.0);
        }
        assert_eq!(started, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn clear_current_ignores_stale_command() {
        let queues = queues();
        let session = SessionId::from("S1");
        let actor = ActorId::from("A1");
        queues
            .set_current(&session, &actor, &CommandId::from("c2"))
            .unwrap();
        assert!(!queues
            .clear_current(&session, &actor, &CommandId::from("c1"))
            .unwrap());
        assert_eq!(
            queues.current(&session, &actor).unwrap(),
            Some(CommandId::from("c2"))
        );
    }

    #[test]
    fn pending_actors_lists_only_non_empty_queues() {
        let queues = queues();
        let session = SessionId::from("S1");
        queues
            .enqueue(&session, &ActorId::from("A1"), &CommandId::from("c1"))
            .unwrap();
        queues
            .enqueue(&session, &ActorId::from("A2"), &CommandId::from("c2"))
            .unwrap();
        queues
            .enqueue(&SessionId::from("S2"), &ActorId::from("A9"), &CommandId::from("c9"))
            .unwrap();
        queues.dequeue_next(&session, &ActorId::from("A1")).unwrap();

        assert_eq!(
            queues.pending_actors(&session).unwrap(),
            vec![ActorId::from("A2")]
        );
    }

    #[test]
    fn pending_actors_stay_within_their_session() {
        let queues = queues();
        let short = SessionId::from("S1");
        let long = SessionId::from("S1:x");
        queues
            .enqueue(&long, &ActorId::from("A"), &CommandId::from("c1"))
            .unwrap();

        assert!(queues.pending_actors(&short).unwrap().is_empty());
        assert_eq!(queues.dequeue_next(&short, &ActorId::from("x:A")).unwrap(), None);
        assert_eq!(queues.pending_actors(&long).unwrap(), vec![ActorId::from("A")]);
    }

    #[test]
    fn requeue_front_puts_the_command_back_first() {
        let queues = queues();
        let session = SessionId::from("S1");
        let actor = ActorId::from("A1");
        for id in ["c1", "c2"] {
            queues
                .enqueue(&session, &actor, &CommandId::from(id))
                .unwrap();
        }
        let head = queues.dequeue_next(&session, &actor).unwrap().unwrap();

        assert!(queues.requeue_front(&session, &actor, &head).unwrap());
        assert_eq!(queues.current(&session, &actor).unwrap(), None);
        assert_eq!(
            queues.pending(&session, &actor).unwrap(),
            vec![CommandId::from("c1"), CommandId::from("c2")]
        );
        assert!(!queues.requeue_front(&session, &actor, &head).unwrap());
    }
}
