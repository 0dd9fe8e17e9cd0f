#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use core_sched::{
    load_scheduler_config_from_env, CommandRepository, ManualClock, MemoryCommandRepository,
    MemorySessionRepository, MemoryStore, SchedulerConfig, SchedulerRuntime, SessionRepository,
};
use sched_schema::{ActorId, Command, CommandId, CommandStatus, CommandType, Session, SessionId};
use serde_json::json;

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_scheduler_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test scheduler config at {}",
            config_path.display()
        );

        std::env::set_var("SCHEDULER_CONFIG_PATH", &config_path);
    });
}

pub fn test_config() -> SchedulerConfig {
    ensure_test_config();
    let (config, path) = load_scheduler_config_from_env();
    assert!(path.is_some(), "fixture config was not loaded");
    config
}

/// Shared backing state that several runtimes can be wired against, the way
/// several scheduler processes share one store.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<MemoryStore>,
    pub commands: Arc<MemoryCommandRepository>,
    pub sessions: Arc<MemorySessionRepository>,
    pub clock: Arc<ManualClock>,
}

impl Backend {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            commands: Arc::new(MemoryCommandRepository::new()),
            sessions: Arc::new(MemorySessionRepository::new()),
            clock: Arc::new(ManualClock::new(0)),
        }
    }

    pub fn runtime(&self) -> SchedulerRuntime {
        SchedulerRuntime::new(
            test_config(),
            self.store.clone(),
            self.store.clone(),
            self.commands.clone(),
            self.sessions.clone(),
            self.clock.clone(),
        )
    }

    pub fn add_session(&self, session: Session) {
        self.sessions.insert(session).expect("insert session");
    }

    pub fn status(&self, id: &str) -> CommandStatus {
        self.command(id).status
    }

    pub fn command(&self, id: &str) -> Command {
        self.commands
            .find_by_id(&CommandId::from(id))
            .expect("command store")
            .unwrap_or_else(|| panic!("command {id} missing"))
    }
}

pub struct Harness {
    pub backend: Backend,
    pub runtime: SchedulerRuntime,
}

impl Harness {
    pub fn new(sessions: impl IntoIterator<Item = Session>) -> Self {
        let backend = Backend::new();
        for session in sessions {
            backend.add_session(session);
        }
        let runtime = backend.runtime();
        Self { backend, runtime }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.backend.clock
    }

    pub fn submit(&self, id: &str, session: &str, actor: &str, command_type: CommandType) {
        self.runtime
            .submit(Command::new(id, session, actor, command_type, json!({})))
            .expect("submit");
    }

    pub fn current(&self, session: &str, actor: &str) -> Option<String> {
        self.runtime
            .queues()
            .current(&SessionId::from(session), &ActorId::from(actor))
            .expect("current pointer")
            .map(|id| id.to_string())
    }

    pub fn queued(&self, session: &str, actor: &str) -> Vec<String> {
        self.runtime
            .queues()
            .pending(&SessionId::from(session), &ActorId::from(actor))
            .expect("queue")
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    pub fn due_scores(&self, session: &str) -> Vec<(String, i64)> {
        self.runtime
            .tracker()
            .entries(&SessionId::from(session))
            .expect("tracker")
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect()
    }

    pub fn status(&self, id: &str) -> CommandStatus {
        self.backend.status(id)
    }
}

pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}
