use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;
use sched_schema::{
    ActorId, CommandId, CommandType, ControlCommand, ControlReply, GameMode, SessionId,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(author, version, about = "Warfront scheduler control client", long_about = None)]
struct Cli {
    /// Admin listener of the scheduler daemon.
    #[arg(long, default_value = "127.0.0.1:41001")]
    endpoint: String,
    /// Seconds to wait for the daemon's reply.
    #[arg(long, default_value_t = 5)]
    timeout: u64,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Register a running session with the daemon.
    Session {
        session: String,
        /// Seconds between turns. Omit for a realtime session.
        #[arg(long)]
        turn_interval: Option<u64>,
    },
    /// Queue a command for an actor.
    Submit {
        command: String,
        session: String,
        actor: String,
        /// TRAIN, MOVE, SCOUT, ...
        command_type: String,
        /// JSON payload handed to the execution worker.
        payload: Option<String>,
    },
    /// Move a turn-based session to its next turn now.
    Advance { session: String },
    /// Pull every in-flight command of a session N turns earlier.
    Accelerate {
        session: String,
        #[arg(default_value_t = 1)]
        turns: i64,
    },
    /// Push every in-flight command of a session N turns later.
    Delay {
        session: String,
        #[arg(default_value_t = 1)]
        turns: i64,
    },
    /// Print the current turn of a session.
    Turn { session: String },
    /// Print the daemon's counters.
    Status,
    /// Ask the daemon to stop its loops and exit.
    Shutdown,
}

impl TryFrom<Action> for ControlCommand {
    type Error = color_eyre::Report;

    fn try_from(action: Action) -> Result<Self> {
        let command = match action {
            Action::Session {
                session,
                turn_interval,
            } => ControlCommand::OpenSession {
                session: SessionId::new(session),
                mode: if turn_interval.is_some() {
                    GameMode::TurnBased
                } else {
                    GameMode::Realtime
                },
                turn_interval_secs: turn_interval.unwrap_or(0),
            },
            Action::Submit {
                command,
                session,
                actor,
                command_type,
                payload,
            } => {
                let payload = match payload {
                    Some(raw) => serde_json::from_str(&raw)
                        .wrap_err_with(|| format!("payload is not valid JSON: {raw}"))?,
                    None => serde_json::json!({}),
                };
                ControlCommand::Submit {
                    command: CommandId::new(command),
                    session: SessionId::new(session),
                    actor: ActorId::new(actor),
                    command_type: command_type.parse::<CommandType>()?,
                    payload,
                }
            }
            Action::Advance { session } => ControlCommand::Advance {
                session: SessionId::new(session),
            },
            Action::Accelerate { session, turns } => ControlCommand::Accelerate {
                session: SessionId::new(session),
                turns,
            },
            Action::Delay { session, turns } => ControlCommand::Delay {
                session: SessionId::new(session),
                turns,
            },
            Action::Turn { session } => ControlCommand::CurrentTurn {
                session: SessionId::new(session),
            },
            Action::Status => ControlCommand::Status,
            Action::Shutdown => ControlCommand::Shutdown,
        };
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let command = ControlCommand::try_from(cli.command)?;
    let wait = Duration::from_secs(cli.timeout.max(1));
    let reply = tokio::time::timeout(wait, send_command(&cli.endpoint, &command))
        .await
        .map_err(|_| eyre!("no reply from {} within {}s", cli.endpoint, wait.as_secs()))??;

    match reply {
        ControlReply::SessionOpened { session } => println!("{session}: opened"),
        ControlReply::Submitted { command, started } => {
            let state = if started { "started" } else { "queued" };
            println!("{command}: {state}")
        }
        ControlReply::Turn { session, turn } => println!("{session}: turn {turn}"),
        ControlReply::Shifted {
            session,
            delta,
            shifted,
        } => println!("{session}: shifted {shifted} command(s) by {delta:+} turn(s)"),
        ControlReply::Status { metrics } => {
            println!("{}", serde_json::to_string_pretty(&metrics)?)
        }
        ControlReply::ShuttingDown => println!("scheduler shutting down"),
        ControlReply::Error { message } => bail!("scheduler rejected '{command}': {message}"),
    }
    Ok(())
}

async fn send_command(endpoint: &str, command: &ControlCommand) -> Result<ControlReply> {
    let stream = TcpStream::connect(endpoint)
        .await
        .wrap_err_with(|| format!("failed to connect to {endpoint}"))?;
    let (read_half, mut write_half) = stream.into_split();

    let line = format!("{command}\n");
    debug!(%command, endpoint, "command.sent");
    write_half.write_all(line.as_bytes()).await?;

    let mut reader = BufReader::new(read_half);
    let mut reply = String::new();
    if reader.read_line(&mut reply).await? == 0 {
        bail!("{endpoint} closed the connection without replying");
    }
    let reply: ControlReply = serde_json::from_str(reply.trim())
        .wrap_err_with(|| format!("unreadable reply: {}", reply.trim()))?;
    Ok(reply)
}
