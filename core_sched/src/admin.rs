//! Line-oriented TCP control listener for the daemon.
//!
//! Each client thread parses its lines and forwards them over a channel; the
//! daemon's main thread answers them one at a time through [`serve_requests`].

use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use sched_schema::{parse_control_line, Command, ControlCommand, ControlReply, GameMode, Session};
use tracing::{info, warn};

use crate::SchedulerRuntime;

/// A parsed control command waiting for the main thread's answer.
pub struct AdminRequest {
    pub command: ControlCommand,
    reply_tx: Sender<ControlReply>,
}

impl AdminRequest {
    pub fn respond(self, reply: ControlReply) {
        let _ = self.reply_tx.send(reply);
    }
}

pub struct AdminListener {
    local_addr: SocketAddr,
    requests: Receiver<AdminRequest>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AdminListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn requests(&self) -> &Receiver<AdminRequest> {
        &self.requests
    }

    /// Stops accepting new clients. Connected clients keep their threads
    /// until they hang up.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub fn spawn_admin_listener(bind_addr: SocketAddr) -> io::Result<AdminListener> {
    let listener = TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let (sender, receiver) = unbounded::<AdminRequest>();
    let running = Arc::new(AtomicBool::new(true));
    let accept_running = Arc::clone(&running);
    let thread = thread::Builder::new()
        .name("admin-listener".to_string())
        .spawn(move || {
            while accept_running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        info!(target: "warfront::admin", %addr, "admin.client_connected");
                        let sender = sender.clone();
                        thread::spawn(move || handle_client(stream, sender));
                    }
                    Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(err) => {
                        warn!(target: "warfront::admin", error = %err, "admin.accept_failed");
                        thread::sleep(Duration::from_millis(200));
                    }
                }
            }
        })?;

    info!(target: "warfront::admin", bind = %local_addr, "admin.listening");
    Ok(AdminListener {
        local_addr,
        requests: receiver,
        running,
        thread: Some(thread),
    })
}

fn handle_client(stream: TcpStream, sender: Sender<AdminRequest>) {
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(target: "warfront::admin", error = %err, "admin.client_setup_failed");
        return;
    }
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(target: "warfront::admin", error = %err, "admin.client_setup_failed");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let reply = match parse_control_line(trimmed) {
                    Ok(command) => {
                        let (reply_tx, reply_rx) = bounded(1);
                        if sender.send(AdminRequest { command, reply_tx }).is_err() {
                            break;
                        }
                        match reply_rx.recv() {
                            Ok(reply) => reply,
                            Err(_) => break,
                        }
                    }
                    Err(err) => {
                        warn!(target: "warfront::admin", line = trimmed, error = %err, "admin.invalid_command");
                        ControlReply::error(err)
                    }
                };
                let closing = matches!(reply, ControlReply::ShuttingDown);
                if let Err(err) = writer.write_all(reply.to_line().as_bytes()) {
                    warn!(target: "warfront::admin", error = %err, "admin.write_failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            Err(err) => {
                warn!(target: "warfront::admin", error = %err, "admin.read_failed");
                break;
            }
        }
    }
}

/// Answers one control command. The flag is true when the daemon should
/// shut down.
pub fn handle_control(
    command: &ControlCommand,
    runtime: &SchedulerRuntime,
) -> (ControlReply, bool) {
    let turns = runtime.turn_scheduler();
    let reply = match command {
        ControlCommand::OpenSession {
            session,
            mode,
            turn_interval_secs,
        } => {
            let record = match mode {
                GameMode::Realtime => Session::realtime(session.clone()),
                GameMode::TurnBased => Session::turn_based(session.clone(), *turn_interval_secs),
            };
            match runtime.sessions().insert(record) {
                Ok(()) => ControlReply::SessionOpened {
                    session: session.clone(),
                },
                Err(err) => ControlReply::error(err),
            }
        }
        ControlCommand::Submit {
            command: id,
            session,
            actor,
            command_type,
            payload,
        } => {
            let submitted = Command::new(
                id.clone(),
                session.clone(),
                actor.clone(),
                *command_type,
                payload.clone(),
            );
            match runtime.submit(submitted) {
                Ok(started) => ControlReply::Submitted {
                    command: id.clone(),
                    started: started.is_some(),
                },
                Err(err) => ControlReply::error(err),
            }
        }
        ControlCommand::Advance { session } => match turns.advance_turn(session) {
            Ok(turn) => ControlReply::Turn {
                session: session.clone(),
                turn,
            },
            Err(err) => ControlReply::error(err),
        },
        ControlCommand::Accelerate { session, turns: n } => {
            match turns.accelerate_turn(session, *n) {
                Ok(shifted) => ControlReply::Shifted {
                    session: session.clone(),
                    delta: -n,
                    shifted,
                },
                Err(err) => ControlReply::error(err),
            }
        }
        ControlCommand::Delay { session, turns: n } => match turns.delay_turn(session, *n) {
            Ok(shifted) => ControlReply::Shifted {
                session: session.clone(),
                delta: *n,
                shifted,
            },
            Err(err) => ControlReply::error(err),
        },
        ControlCommand::CurrentTurn { session } => match turns.get_current_turn(session) {
            Ok(turn) => ControlReply::Turn {
                session: session.clone(),
                turn,
            },
            Err(err) => ControlReply::error(err),
        },
        ControlCommand::Status => match serde_json::to_value(runtime.metrics().snapshot()) {
            Ok(metrics) => ControlReply::Status { metrics },
            Err(err) => ControlReply::error(err),
        },
        ControlCommand::Shutdown => return (ControlReply::ShuttingDown, true),
    };

    if let ControlReply::Error { message } = &reply {
        warn!(target: "warfront::admin", command = %command, message = %message, "admin.command_rejected");
    } else {
        info!(target: "warfront::admin", command = %command, "admin.command_applied");
    }
    (reply, false)
}

/// Answers requests until a shutdown command arrives or every sender is
/// gone.
pub fn serve_requests(requests: &Receiver<AdminRequest>, runtime: &SchedulerRuntime) {
    while let Ok(request) = requests.recv() {
        let (reply, shutdown) = handle_control(&request.command, runtime);
        request.respond(reply);
        if shutdown {
            info!(target: "warfront::admin", "admin.shutdown_requested");
            break;
        }
    }
}
