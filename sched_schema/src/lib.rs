//! Data contracts shared by the Warfront scheduler daemon and its tooling.
//!
//! Commands, sessions and the stream envelope live here so the control-plane
//! client can speak to the daemon without pulling in the scheduling runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod control;

pub use control::{parse_control_line, ControlCommand, ControlParseError, ControlReply};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a submitted command.
    CommandId
);
string_id!(
    /// Identifier of one running game world.
    SessionId
);
string_id!(
    /// Identifier of the commander that owns a command queue.
    ActorId
);

/// Kinds of command the scheduler knows how to time.
///
/// The scheduler never interprets a command beyond its kind; effects are
/// applied by the downstream execution worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Train,
    Recruit,
    Move,
    Attack,
    Defend,
    Build,
    Research,
    Trade,
    Scout,
    Rest,
}

impl CommandType {
    pub const ALL: [CommandType; 10] = [
        CommandType::Train,
        CommandType::Recruit,
        CommandType::Move,
        CommandType::Attack,
        CommandType::Defend,
        CommandType::Build,
        CommandType::Research,
        CommandType::Trade,
        CommandType::Scout,
        CommandType::Rest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Train => "TRAIN",
            CommandType::Recruit => "RECRUIT",
            CommandType::Move => "MOVE",
            CommandType::Attack => "ATTACK",
            CommandType::Defend => "DEFEND",
            CommandType::Build => "BUILD",
            CommandType::Research => "RESEARCH",
            CommandType::Trade => "TRADE",
            CommandType::Scout => "SCOUT",
            CommandType::Rest => "REST",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command type: {0}")]
pub struct UnknownCommandType(pub String);

impl FromStr for CommandType {
    type Err = UnknownCommandType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        CommandType::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownCommandType(value.to_string()))
    }
}

/// Lifecycle of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Scheduled,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Cancelled
        )
    }
}

/// A submitted unit of work as recorded by the command store.
///
/// Timestamps are epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: CommandId,
    pub session_id: SessionId,
    pub actor_id: ActorId,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Command {
    pub fn new(
        id: impl Into<CommandId>,
        session_id: impl Into<SessionId>,
        actor_id: impl Into<ActorId>,
        command_type: CommandType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            actor_id: actor_id.into(),
            command_type,
            payload,
            status: CommandStatus::Pending,
            due_score: None,
            start_time: None,
            completion_time: None,
            result: None,
            error: None,
        }
    }
}

/// Time model of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameMode {
    Realtime,
    TurnBased,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Running,
    Paused,
    Finished,
}

/// One game world instance as seen by the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub game_mode: GameMode,
    /// Wall-clock seconds between turns. Ignored for realtime sessions.
    pub turn_interval_secs: u64,
    pub current_turn: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn_at: Option<i64>,
    pub status: SessionStatus,
}

impl Session {
    pub fn realtime(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            game_mode: GameMode::Realtime,
            turn_interval_secs: 0,
            current_turn: 0,
            last_turn_at: None,
            status: SessionStatus::Running,
        }
    }

    pub fn turn_based(id: impl Into<SessionId>, turn_interval_secs: u64) -> Self {
        Self {
            id: id.into(),
            game_mode: GameMode::TurnBased,
            turn_interval_secs,
            current_turn: 0,
            last_turn_at: None,
            status: SessionStatus::Running,
        }
    }

    pub fn is_turn_based(&self) -> bool {
        self.game_mode == GameMode::TurnBased
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }
}

/// Wire message published on the execution stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnvelope {
    pub command_id: CommandId,
    pub session_id: SessionId,
    pub actor_id: ActorId,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("failed to encode stream envelope: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode stream envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

impl StreamEnvelope {
    pub fn for_command(command: &Command) -> Self {
        Self {
            command_id: command.id.clone(),
            session_id: command.session_id.clone(),
            actor_id: command.actor_id.clone(),
            command_type: command.command_type,
            payload: command.payload.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)
    }
}
