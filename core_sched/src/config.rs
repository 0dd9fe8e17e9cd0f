use std::{
    collections::BTreeMap,
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use sched_schema::CommandType;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_SCHEDULER_CONFIG: &str = include_str!("data/scheduler_config.json");

/// Runtime settings for the scheduler daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub admin_bind: SocketAddr,
    pub stream: StreamConfig,
    pub durations: DurationTable,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            error_backoff_ms: 5_000,
            admin_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 41001),
            stream: StreamConfig::default(),
            durations: DurationTable::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn builtin() -> Self {
        serde_json::from_str(BUILTIN_SCHEDULER_CONFIG)
            .expect("builtin scheduler config should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = SchedulerConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse scheduler config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read scheduler config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Execution stream and consumer-group settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub stream_key: String,
    pub group: String,
    pub consumer: String,
    pub dead_letter_stream: String,
    pub batch_size: usize,
    pub block_ms: u64,
    pub max_deliveries: u32,
    pub claim_min_idle_ms: u64,
}

impl StreamConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn claim_min_idle(&self) -> Duration {
        Duration::from_millis(self.claim_min_idle_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_key: "commands:execute".to_string(),
            group: "command-workers".to_string(),
            consumer: "worker-1".to_string(),
            dead_letter_stream: "commands:dead".to_string(),
            batch_size: 10,
            block_ms: 1_000,
            max_deliveries: 3,
            claim_min_idle_ms: 60_000,
        }
    }
}

/// How long each command type runs in a realtime session.
///
/// Keys are command type names (`TRAIN`, `MOVE`, ...). Types without an entry
/// take `default_secs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DurationTable {
    pub default_secs: u64,
    pub per_type: BTreeMap<String, u64>,
}

impl Default for DurationTable {
    fn default() -> Self {
        Self {
            default_secs: 300,
            per_type: BTreeMap::new(),
        }
    }
}

impl DurationTable {
    pub fn duration_secs(&self, command_type: CommandType) -> u64 {
        self.per_type
            .get(command_type.as_str())
            .copied()
            .unwrap_or(self.default_secs)
    }

    /// Table entries that do not name a known command type.
    pub fn unknown_types(&self) -> Vec<&str> {
        self.per_type
            .keys()
            .map(String::as_str)
            .filter(|name| !CommandType::ALL.iter().any(|ty| ty.as_str() == *name))
            .collect()
    }
}

pub fn load_scheduler_config_from_env() -> (SchedulerConfig, Option<PathBuf>) {
    let Some(path) = env::var("SCHEDULER_CONFIG_PATH").ok().map(PathBuf::from) else {
        tracing::info!(
            target: "warfront::config",
            "scheduler_config.loaded=builtin"
        );
        return (SchedulerConfig::builtin(), None);
    };

    match SchedulerConfig::from_file(&path) {
        Ok(config) => {
            for name in config.durations.unknown_types() {
                tracing::warn!(
                    target: "warfront::config",
                    command_type = name,
                    "scheduler_config.unknown_command_type"
                );
            }
            tracing::info!(
                target: "warfront::config",
                path = %path.display(),
                "scheduler_config.loaded=file"
            );
            (config, Some(path))
        }
        Err(err) => {
            tracing::warn!(
                target: "warfront::config",
                path = %path.display(),
                error = %err,
                "scheduler_config.load_failed"
            );
            (SchedulerConfig::builtin(), None)
        }
    }
}
