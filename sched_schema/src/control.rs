//! Line-oriented control protocol spoken by the daemon's admin listener.

use std::fmt;
use std::num::ParseIntError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ActorId, CommandId, CommandType, GameMode, SessionId, UnknownCommandType};

/// Administrative request accepted by the daemon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Registers a running session.
    OpenSession {
        session: SessionId,
        mode: GameMode,
        turn_interval_secs: u64,
    },
    /// Queues a command for an actor.
    Submit {
        command: CommandId,
        session: SessionId,
        actor: ActorId,
        command_type: CommandType,
        payload: serde_json::Value,
    },
    Advance { session: SessionId },
    Accelerate { session: SessionId, turns: i64 },
    Delay { session: SessionId, turns: i64 },
    CurrentTurn { session: SessionId },
    Status,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum ControlParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error(transparent)]
    UnknownCommandType(#[from] UnknownCommandType),
    #[error("unknown game mode '{0}', expected realtime or turn-based")]
    UnknownGameMode(String),
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}

const DEFAULT_TURN_INTERVAL_SECS: u64 = 60;

pub fn parse_control_line(input: &str) -> Result<ControlCommand, ControlParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ControlParseError::Empty);
    }

    let (verb, rest) = split_token(trimmed);
    let verb = verb.to_ascii_lowercase();
    if verb == "submit" {
        return parse_submit(rest);
    }

    let mut parts = rest.split_whitespace();
    match verb.as_str() {
        "session" => {
            let session = next_session(&mut parts)?;
            let mode = match parts.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("realtime") => GameMode::Realtime,
                Some("turn-based" | "turn_based" | "turnbased") => GameMode::TurnBased,
                Some(other) => return Err(ControlParseError::UnknownGameMode(other.to_string())),
            };
            let turn_interval_secs = match (mode, parts.next()) {
                (GameMode::Realtime, _) => 0,
                (GameMode::TurnBased, None) => DEFAULT_TURN_INTERVAL_SECS,
                (GameMode::TurnBased, Some(value)) => parse_u64(value, "turn interval")?,
            };
            Ok(ControlCommand::OpenSession {
                session,
                mode,
                turn_interval_secs,
            })
        }
        "advance" => {
            let session = next_session(&mut parts)?;
            Ok(ControlCommand::Advance { session })
        }
        "accelerate" | "delay" => {
            let session = next_session(&mut parts)?;
            let turns_str = parts.next().unwrap_or("1");
            let turns = parse_i64(turns_str, "turn shift")?;
            if verb == "accelerate" {
                Ok(ControlCommand::Accelerate { session, turns })
            } else {
                Ok(ControlCommand::Delay { session, turns })
            }
        }
        "turn" => {
            let session = next_session(&mut parts)?;
            Ok(ControlCommand::CurrentTurn { session })
        }
        "status" => Ok(ControlCommand::Status),
        "shutdown" | "quit" => Ok(ControlCommand::Shutdown),
        other => Err(ControlParseError::UnknownCommand(other.to_string())),
    }
}

/// `submit <command> <session> <actor> <type> [json payload]`. The payload
/// is the rest of the line, kept verbatim.
fn parse_submit(rest: &str) -> Result<ControlCommand, ControlParseError> {
    let (command, rest) = split_token(rest);
    let (session, rest) = split_token(rest);
    let (actor, rest) = split_token(rest);
    let (command_type, payload) = split_token(rest);
    for (value, name) in [
        (command, "command"),
        (session, "session"),
        (actor, "actor"),
        (command_type, "command type"),
    ] {
        if value.is_empty() {
            return Err(ControlParseError::MissingArgument(name));
        }
    }
    let payload = if payload.is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(payload).map_err(ControlParseError::InvalidPayload)?
    };
    Ok(ControlCommand::Submit {
        command: CommandId::from(command),
        session: SessionId::from(session),
        actor: ActorId::from(actor),
        command_type: command_type.parse()?,
        payload,
    })
}

fn split_token(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(end) => (&input[..end], input[end..].trim()),
        None => (input, ""),
    }
}

fn next_session<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
) -> Result<SessionId, ControlParseError> {
    parts
        .next()
        .map(SessionId::from)
        .ok_or(ControlParseError::MissingArgument("session"))
}

fn parse_u64(value: &str, context: &'static str) -> Result<u64, ControlParseError> {
    value
        .parse::<u64>()
        .map_err(|source| ControlParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_i64(value: &str, context: &'static str) -> Result<i64, ControlParseError> {
    value
        .parse::<i64>()
        .map_err(|source| ControlParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::OpenSession {
                session,
                mode: GameMode::Realtime,
                ..
            } => write!(f, "session {} realtime", session),
            ControlCommand::OpenSession {
                session,
                mode: GameMode::TurnBased,
                turn_interval_secs,
            } => write!(f, "session {} turn-based {}", session, turn_interval_secs),
            ControlCommand::Submit {
                command,
                session,
                actor,
                command_type,
                payload,
            } => write!(
                f,
                "submit {} {} {} {} {}",
                command, session, actor, command_type, payload
            ),
            ControlCommand::Advance { session } => write!(f, "advance {}", session),
            ControlCommand::Accelerate { session, turns } => {
                write!(f, "accelerate {} {}", session, turns)
            }
            ControlCommand::Delay { session, turns } => write!(f, "delay {} {}", session, turns),
            ControlCommand::CurrentTurn { session } => write!(f, "turn {}", session),
            ControlCommand::Status => f.write_str("status"),
            ControlCommand::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Single-line JSON reply written back for every control request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    SessionOpened {
        session: SessionId,
    },
    Submitted {
        command: CommandId,
        started: bool,
    },
    Turn {
        session: SessionId,
        turn: u64,
    },
    Shifted {
        session: SessionId,
        delta: i64,
        shifted: usize,
    },
    Status {
        metrics: serde_json::Value,
    },
    ShuttingDown,
    Error {
        message: String,
    },
}

impl ControlReply {
    pub fn error(err: impl fmt::Display) -> Self {
        ControlReply::Error {
            message: err.to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(encoding_failed);
        line.push('\n');
        line
    }
}

fn encoding_failed(err: impl fmt::Display) -> String {
    serde_json::json!({
        "reply": "error",
        "message": format!("reply encoding failed: {err}"),
    })
    .to_string()
}
