//! Record stores for commands and sessions.
//!
//! The scheduler only reads and patches these records; their persistence
//! lives elsewhere. The in-memory versions back the daemon and the tests.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use sched_schema::{Command, CommandId, CommandStatus, Session, SessionId, SessionStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("command {0} not found")]
    CommandNotFound(CommandId),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Status transition written to the command store.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: CommandStatus,
    pub at_ms: i64,
    pub due_score: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn executing(at_ms: i64, due_score: i64) -> Self {
        Self {
            status: CommandStatus::Executing,
            at_ms,
            due_score: Some(due_score),
            result: None,
            error: None,
        }
    }

    /// Back to waiting after a start that could not finish.
    pub fn pending(at_ms: i64) -> Self {
        Self {
            status: CommandStatus::Pending,
            at_ms,
            due_score: None,
            result: None,
            error: None,
        }
    }

    pub fn completed(at_ms: i64, result: Option<serde_json::Value>) -> Self {
        Self {
            status: CommandStatus::Completed,
            at_ms,
            due_score: None,
            result,
            error: None,
        }
    }

    pub fn failed(at_ms: i64, error: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            at_ms,
            due_score: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(at_ms: i64) -> Self {
        Self {
            status: CommandStatus::Cancelled,
            at_ms,
            due_score: None,
            result: None,
            error: None,
        }
    }
}

pub trait CommandRepository: Send + Sync {
    fn insert(&self, command: Command) -> Result<(), RepositoryError>;

    fn find_by_id(&self, id: &CommandId) -> Result<Option<Command>, RepositoryError>;

    fn update_status(
        &self,
        id: &CommandId,
        update: StatusUpdate,
    ) -> Result<Command, RepositoryError>;

    fn find_executing(&self) -> Result<Vec<Command>, RepositoryError>;

    /// Executing commands whose due-score is at or below `before`.
    fn find_completable(&self, before: i64) -> Result<Vec<Command>, RepositoryError>;
}

/// Fields of a session the scheduler is allowed to change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub current_turn: Option<u64>,
    pub last_turn_at: Option<i64>,
    pub status: Option<SessionStatus>,
}

pub trait SessionRepository: Send + Sync {
    fn insert(&self, session: Session) -> Result<(), RepositoryError>;

    fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;

    fn find_all(&self) -> Result<Vec<Session>, RepositoryError>;

    fn find_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, RepositoryError>;

    fn update(&self, id: &SessionId, patch: SessionPatch) -> Result<Session, RepositoryError>;
}

#[derive(Default)]
pub struct MemoryCommandRepository {
    commands: RwLock<BTreeMap<CommandId, Command>>,
}

impl MemoryCommandRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandRepository for MemoryCommandRepository {
    fn insert(&self, command: Command) -> Result<(), RepositoryError> {
        let mut commands = self.commands.write();
        if commands.contains_key(&command.id) {
            return Err(RepositoryError::Duplicate {
                kind: "command",
                id: command.id.to_string(),
            });
        }
        commands.insert(command.id.clone(), command);
        Ok(())
    }

    fn find_by_id(&self, id: &CommandId) -> Result<Option<Command>, RepositoryError> {
        Ok(self.commands.read().get(id).cloned())
    }

    fn update_status(
        &self,
        id: &CommandId,
        update: StatusUpdate,
    ) -> Result<Command, RepositoryError> {
        let mut commands = self.commands.write();
        let command = commands
            .get_mut(id)
            .ok_or_else(|| RepositoryError::CommandNotFound(id.clone()))?;
        command.status = update.status;
        match update.status {
            CommandStatus::Executing => {
                command.start_time = Some(update.at_ms);
                command.due_score = update.due_score;
            }
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Cancelled => {
                command.completion_time = Some(update.at_ms);
            }
            CommandStatus::Pending | CommandStatus::Scheduled => {}
        }
        if update.result.is_some() {
            command.result = update.result;
        }
        if update.error.is_some() {
            command.error = update.error;
        }
        Ok(command.clone())
    }

    fn find_executing(&self) -> Result<Vec<Command>, RepositoryError> {
        Ok(self
            .commands
            .read()
            .values()
            .filter(|command| command.status == CommandStatus::Executing)
            .cloned()
            .collect())
    }

    fn find_completable(&self, before: i64) -> Result<Vec<Command>, RepositoryError> {
        Ok(self
            .commands
            .read()
            .values()
            .filter(|command| {
                command.status == CommandStatus::Executing
                    && command.due_score.is_some_and(|due| due <= before)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: RwLock<BTreeMap<SessionId, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRepository for MemorySessionRepository {
    fn insert(&self, session: Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(RepositoryError::Duplicate {
                kind: "session",
                id: session.id.to_string(),
            });
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        Ok(self.sessions.read().get(id).cloned())
    }

    fn find_all(&self) -> Result<Vec<Session>, RepositoryError> {
        Ok(self.sessions.read().values().cloned().collect())
    }

    fn find_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, RepositoryError> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|session| session.status == status)
            .cloned()
            .collect())
    }

    fn update(&self, id: &SessionId, patch: SessionPatch) -> Result<Session, RepositoryError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| RepositoryError::SessionNotFound(id.clone()))?;
        if let Some(turn) = patch.current_turn {
            session.current_turn = turn;
        }
        if let Some(at) = patch.last_turn_at {
            session.last_turn_at = Some(at);
        }
        if let Some(status) = patch.status {
            session.status = status;
        }
        Ok(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_schema::CommandType;
    use serde_json::json;

    #[test]
    fn status_updates_stamp_lifecycle_times() {
        let repo = MemoryCommandRepository::new();
        repo.insert(Command::new("c1", "S1", "A1", CommandType::Move, json!({})))
            .unwrap();

        let executing = repo
            .update_status(&CommandId::from("c1"), StatusUpdate::executing(1_000, 121_000))
            .unwrap();
        assert_eq!(executing.start_time, Some(1_000));
        assert_eq!(executing.due_score, Some(121_000));
        assert_eq!(repo.find_executing().unwrap().len(), 1);
        assert!(repo.find_completable(120_999).unwrap().is_empty());
        assert_eq!(repo.find_completable(121_000).unwrap().len(), 1);

        let done = repo
            .update_status(
                &CommandId::from("c1"),
                StatusUpdate::completed(121_500, Some(json!({"ok": true}))),
            )
            .unwrap();
        assert_eq!(done.status, CommandStatus::Completed);
        assert_eq!(done.completion_time, Some(121_500));
        assert!(repo.find_executing().unwrap().is_empty());
    }

    #[test]
    fn missing_records_are_reported() {
        let commands = MemoryCommandRepository::new();
        assert!(matches!(
            commands.update_status(&CommandId::from("nope"), StatusUpdate::cancelled(0)),
            Err(RepositoryError::CommandNotFound(_))
        ));
        let sessions = MemorySessionRepository::new();
        assert!(matches!(
            sessions.update(&SessionId::from("nope"), SessionPatch::default()),
            Err(RepositoryError::SessionNotFound(_))
        ));
    }

    #[test]
    fn sessions_filter_by_status() {
        let repo = MemorySessionRepository::new();
        repo.insert(Session::realtime("S1")).unwrap();
        let mut paused = Session::turn_based("S2", 30);
        paused.status = SessionStatus::Paused;
        repo.insert(paused).unwrap();
        assert!(repo.insert(Session::realtime("S1")).is_err());

        let running = repo.find_by_status(SessionStatus::Running).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, SessionId::from("S1"));
        assert_eq!(repo.find_all().unwrap().len(), 2);
    }
}
