use backflow::{
    BoxError, Call, DispatchConfig, Dispatcher, Params, RemoteCall, SelectionStrategy,
    StreamSource,
};
use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::time::Instant;
use tokio::runtime::Builder;

// Items drained per benchmark iteration.
const TOTAL_ITEMS: u64 = 10_000;

/// Answers immediately after one scheduler yield, so the benchmark measures
/// dispatch overhead rather than I/O.
struct Immediate;

impl RemoteCall for Immediate {
    async fn call(&self, _function: &str, params: &Params) -> Result<Value, BoxError> {
        tokio::task::yield_now().await;
        Ok(Value::from(params.len()))
    }
}

#[derive(Clone, Copy, Debug)]
struct DrainBenchParams {
    endpoints: usize,
    ceiling: usize,
    batch_size: Option<usize>,
    strategy: SelectionStrategy,
}

fn dispatcher(params: DrainBenchParams) -> Dispatcher<Immediate> {
    let config = DispatchConfig {
        endpoint_count: params.endpoints,
        maximum_request_per_client: params.ceiling,
        batch_size: params.batch_size,
        strategy: params.strategy,
        ..DispatchConfig::default()
    };
    Dispatcher::new(config, |_, _| Ok(Immediate)).unwrap()
}

async fn drain(dispatcher: &Dispatcher<Immediate>, batched: bool) -> usize {
    let source = StreamSource::from_items(0..TOTAL_ITEMS);
    if batched {
        dispatcher
            .process_batches(source, |batch| {
                Some(Call::with_param("settle", "items", json!(batch)))
            })
            .await
            .unwrap()
    } else {
        dispatcher
            .process_stream(source, |n| Some(Call::with_param("settle", "n", json!(n))))
            .await
            .unwrap()
    }
}

fn drain_bench(c: &mut Criterion) {
    let endpoint_cases = [1, 4, 16];
    let ceiling_cases = [1, 10];
    let batch_cases = [None, Some(100)];
    let strategy_cases = [
        SelectionStrategy::Lifo,
        SelectionStrategy::RoundRobin,
        SelectionStrategy::LeastLoaded,
    ];

    let mut cases = Vec::new();
    for &endpoints in &endpoint_cases {
        for &ceiling in &ceiling_cases {
            for &batch_size in &batch_cases {
                for &strategy in &strategy_cases {
                    cases.push(DrainBenchParams {
                        endpoints,
                        ceiling,
                        batch_size,
                        strategy,
                    });
                }
            }
        }
    }
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    for params in &cases {
        let mut group = c.benchmark_group("dispatcher/drain");
        group.throughput(Throughput::Elements(TOTAL_ITEMS));

        let batch = params.batch_size.map_or_else(|| "none".to_string(), |b| b.to_string());
        group.bench_function(
            format!(
                "endpoints/{}/ceiling/{}/batch/{}/strategy/{}",
                params.endpoints, params.ceiling, batch, params.strategy,
            ),
            |b| {
                let dispatcher = dispatcher(*params);
                let batched = params.batch_size.is_some();
                b.to_async(&rt).iter_custom(|iters| {
                    let dispatcher = &dispatcher;
                    async move {
                        let start = Instant::now();
                        for _ in 0..iters {
                            black_box(drain(dispatcher, batched).await);
                        }
                        start.elapsed()
                    }
                });
            },
        );

        group.finish();
    }
}

criterion_group!(benches, drain_bench);
criterion_main!(benches);
