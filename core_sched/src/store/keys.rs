//! Keyspace layout, one function per key family.
//!
//! Keys that carry both a session and an actor prefix the session id with
//! its length, so `S1` + `x:A` and `S1:x` + `A` never share a key.

use sched_schema::{ActorId, SessionId};

pub fn turn(session: &SessionId) -> String {
    format!("turn:{}", session)
}

pub fn queue(session: &SessionId, actor: &ActorId) -> String {
    format!("{}{}", queue_prefix(session), actor)
}

pub fn queue_prefix(session: &SessionId) -> String {
    scoped("queue", session)
}

pub fn current(session: &SessionId, actor: &ActorId) -> String {
    format!("{}{}", scoped("current", session), actor)
}

pub fn due(session: &SessionId) -> String {
    format!("due:{}", session)
}

fn scoped(family: &str, session: &SessionId) -> String {
    format!("{}:{}:{}:", family, session.as_str().len(), session)
}

/// Recovers the actor from a key produced by [`queue`].
pub fn actor_from_queue_key(session: &SessionId, key: &str) -> Option<ActorId> {
    key.strip_prefix(&queue_prefix(session))
        .filter(|actor| !actor.is_empty())
        .map(ActorId::from)
}
