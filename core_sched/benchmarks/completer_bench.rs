use std::sync::Arc;

use core_sched::{ManualClock, SchedulerConfig, SchedulerRuntime};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sched_schema::{Command, CommandType, Session};
use serde_json::json;

fn loaded_runtime(actors: u32) -> (SchedulerRuntime, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let runtime = SchedulerRuntime::in_memory(SchedulerConfig::builtin(), clock.clone());
    runtime
        .sessions()
        .insert(Session::realtime("bench"))
        .expect("insert session");
    for actor in 0..actors {
        for step in 0..2 {
            let command = Command::new(
                format!("c{actor}-{step}"),
                "bench",
                format!("a{actor}"),
                CommandType::Train,
                json!({}),
            );
            runtime.submit(command).expect("submit");
        }
    }
    clock.set(300_000);
    (runtime, clock)
}

fn bench_completer(c: &mut Criterion) {
    let mut group = c.benchmark_group("completer");

    for actors in [16u32, 64, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("actors", actors), &actors, |b, &actors| {
            b.iter_batched(
                || loaded_runtime(actors),
                |(runtime, _clock)| {
                    runtime.completer().tick().expect("tick");
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(completer_benches, bench_completer);
criterion_main!(completer_benches);
