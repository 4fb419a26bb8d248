use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use messaging::InMemoryBroker;
use saga::{
    BrokerStepExecutor, ExecutorRegistry, InMemorySagaRepository, InMemoryStepExecutor, Saga,
    SagaOrchestrator, SagaStep,
};
use tokio_util::sync::CancellationToken;

fn make_saga(steps: usize) -> Saga {
    Saga::new("bench", "bench-correlation", Duration::from_secs(60)).with_steps((0..steps).map(
        |i| {
            SagaStep::new(format!("step-{i}"), "memory.do.work", "{}")
                .with_compensation("memory.undo.work", "{}")
        },
    ))
}

fn bench_happy_path_10_steps(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("orchestrator/happy_path_10_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                let orchestrator = SagaOrchestrator::new(
                    InMemorySagaRepository::new(),
                    ExecutorRegistry::new().with(InMemoryStepExecutor::new()),
                );
                orchestrator
                    .start_saga(make_saga(10), &CancellationToken::new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_compensate_9_steps(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("orchestrator/compensate_9_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                let executor = InMemoryStepExecutor::new();
                executor.set_fail_on_execute("step-9", true);
                let orchestrator = SagaOrchestrator::new(
                    InMemorySagaRepository::new(),
                    ExecutorRegistry::new().with(executor),
                );
                orchestrator
                    .start_saga(make_saga(10), &CancellationToken::new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_broker_steps(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("orchestrator/broker_publish_5_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                let broker = InMemoryBroker::new();
                let orchestrator = SagaOrchestrator::new(
                    InMemorySagaRepository::new(),
                    ExecutorRegistry::new().with(BrokerStepExecutor::new(
                        Arc::new(broker),
                        Duration::from_secs(1),
                    )),
                );
                let saga = Saga::new("bench", "c", Duration::from_secs(60)).with_steps(
                    (0..5).map(|i| {
                        SagaStep::new(format!("publish-{i}"), "broker.publish.bench.step.done", "{}")
                    }),
                );
                orchestrator
                    .start_saga(saga, &CancellationToken::new())
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_happy_path_10_steps,
    bench_compensate_9_steps,
    bench_broker_steps
);
criterion_main!(benches);
