use std::sync::Arc;

use tracing::{error, info, warn};

use core_sched::admin::{serve_requests, spawn_admin_listener};
use core_sched::{
    load_scheduler_config_from_env, LoggingExecutor, SchedulerRuntime, SystemClock,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, config_path) = load_scheduler_config_from_env();
    let admin_bind = config.admin_bind;
    let runtime = SchedulerRuntime::in_memory(config, Arc::new(SystemClock));

    let admin = match spawn_admin_listener(admin_bind) {
        Ok(listener) => listener,
        Err(err) => {
            error!(target: "warfront::server", bind = %admin_bind, error = %err, "admin.bind_failed");
            std::process::exit(1);
        }
    };

    let loops = match runtime.start_loops(Arc::new(LoggingExecutor)) {
        Ok(loops) => loops,
        Err(err) => {
            error!(target: "warfront::server", error = %err, "scheduler.start_failed");
            std::process::exit(1);
        }
    };

    info!(
        target: "warfront::server",
        admin_bind = %admin.local_addr(),
        config_path = ?config_path,
        stream = %runtime.config().stream.stream_key,
        "Warfront command scheduler ready"
    );

    serve_requests(admin.requests(), &runtime);

    for handle in &loops {
        handle.stop();
    }
    for handle in loops {
        let name = handle.name();
        handle.join();
        info!(target: "warfront::server", loop_name = name, "scheduler.loop_joined");
    }
    admin.stop();
    let snapshot = runtime.metrics().snapshot();
    if snapshot.tick_errors > 0 {
        warn!(target: "warfront::server", tick_errors = snapshot.tick_errors, "scheduler.stopped_with_errors");
    }
    info!(
        target: "warfront::server",
        commands_completed = snapshot.commands_completed,
        turns_advanced = snapshot.turns_advanced,
        "scheduler.stopped"
    );
}
