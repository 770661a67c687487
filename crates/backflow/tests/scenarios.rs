use backflow::{
    BoxError, Call, DispatchConfig, Dispatcher, Error, Params, RemoteCall, SelectionStrategy,
    StreamSource, channel,
};
use core::time::Duration;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::{sync::Notify, time::sleep};

/// Shared record of what every endpoint saw.
#[derive(Default)]
struct Ledger {
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    inflight: Vec<usize>,
    peaks: Vec<usize>,
    total_inflight: usize,
    total_peak: usize,
    calls: Vec<(usize, String, Params)>,
}

impl Ledger {
    fn new(endpoints: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LedgerState {
                inflight: vec![0; endpoints],
                peaks: vec![0; endpoints],
                ..LedgerState::default()
            }),
        })
    }

    fn enter(&self, id: usize, function: &str, params: &Params) {
        let mut state = self.state.lock();
        state.inflight[id] += 1;
        state.peaks[id] = state.peaks[id].max(state.inflight[id]);
        state.total_inflight += 1;
        state.total_peak = state.total_peak.max(state.total_inflight);
        state.calls.push((id, function.to_string(), params.clone()));
    }

    fn exit(&self, id: usize) {
        let mut state = self.state.lock();
        state.inflight[id] -= 1;
        state.total_inflight -= 1;
    }

    fn peaks(&self) -> Vec<usize> {
        self.state.lock().peaks.clone()
    }

    fn total_peak(&self) -> usize {
        self.state.lock().total_peak
    }

    fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    fn calls(&self) -> Vec<(usize, String, Params)> {
        self.state.lock().calls.clone()
    }
}

/// An endpoint that answers after a delay derived from the call's `n` param
/// and fails any call whose `n` equals `fail_on`.
struct Mock {
    id: usize,
    ledger: Arc<Ledger>,
    fail_on: Option<u64>,
}

impl RemoteCall for Mock {
    async fn call(&self, function: &str, params: &Params) -> Result<Value, BoxError> {
        self.ledger.enter(self.id, function, params);
        let n = params.get("n").and_then(Value::as_u64).unwrap_or_default();
        sleep(Duration::from_millis(10 + (n * 7) % 13)).await;
        self.ledger.exit(self.id);

        if self.fail_on == Some(n) {
            return Err(format!("settlement {n} rejected").into());
        }
        Ok(json!({ "endpoint": self.id, "n": n }))
    }
}

fn config(endpoint_count: usize, ceiling: usize) -> DispatchConfig {
    DispatchConfig {
        endpoint_count,
        base_address: "http://settlement.local".into(),
        maximum_request_per_client: ceiling,
        ..DispatchConfig::default()
    }
}

fn mock_dispatcher(
    config: DispatchConfig,
    fail_on: Option<u64>,
) -> (Dispatcher<Mock>, Arc<Ledger>) {
    let ledger = Ledger::new(config.endpoint_count);
    let shared = Arc::clone(&ledger);
    let dispatcher = Dispatcher::new(config, move |id, _| {
        Ok(Mock {
            id,
            ledger: Arc::clone(&shared),
            fail_on,
        })
    })
    .unwrap();
    (dispatcher, ledger)
}

fn settle(n: u64) -> Option<Call> {
    Some(Call::with_param("settle", "n", json!(n)))
}

#[tokio::test(start_paused = true)]
async fn scenario_a_ceiling_holds_across_the_pool() {
    let (dispatcher, ledger) = mock_dispatcher(config(3, 2), None);
    let mut source = StreamSource::from_items(0..10_u64);

    let processed = dispatcher.process_stream(&mut source, settle).await.unwrap();

    assert_eq!(processed, 10);
    assert_eq!(ledger.call_count(), 10);
    assert_eq!(ledger.total_peak(), 6);
    assert!(ledger.peaks().iter().all(|&peak| peak <= 2), "{:?}", ledger.peaks());
    assert!(source.pause_count() > 0);
    assert_eq!(source.pause_count(), source.resume_count());
}

#[tokio::test(start_paused = true)]
async fn overlapping_sessions_share_each_endpoint_ceiling() {
    let (dispatcher, ledger) = mock_dispatcher(config(1, 2), None);

    let (first, second) = tokio::join!(
        dispatcher.process_stream(StreamSource::from_items(0..10_u64), settle),
        dispatcher.process_stream(StreamSource::from_items(10..20_u64), settle),
    );

    assert_eq!(first, Ok(10));
    assert_eq!(second, Ok(10));
    assert_eq!(ledger.call_count(), 20);
    assert_eq!(ledger.peaks(), vec![2]);
    assert_eq!(dispatcher.pool().total_active(), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_terminal_partial_batch() {
    let (dispatcher, ledger) = mock_dispatcher(
        DispatchConfig {
            batch_size: Some(4),
            ..config(1, 1)
        },
        None,
    );

    let processed = dispatcher
        .process_batches(StreamSource::from_items(0..9_u64), |batch| {
            Some(Call::with_param("settle", "items", json!(batch)))
        })
        .await
        .unwrap();

    assert_eq!(processed, 9);
    let batches: Vec<Value> = ledger
        .calls()
        .into_iter()
        .map(|(_, _, params)| params["items"].clone())
        .collect();
    assert_eq!(
        batches,
        vec![json!([0, 1, 2, 3]), json!([4, 5, 6, 7]), json!([8])]
    );
}

#[tokio::test(start_paused = true)]
async fn scenario_c_first_failure_rejects_and_stops_dispatching() {
    let (dispatcher, ledger) = mock_dispatcher(config(1, 1), Some(2));
    let mut source = StreamSource::from_items(0..10_u64);

    let result = dispatcher.process_stream(&mut source, settle).await;

    assert_eq!(
        result,
        Err(Error::Transport {
            function: "settle".into(),
            message: "settlement 2 rejected".into(),
        })
    );
    assert_eq!(
        result.unwrap_err().to_string(),
        "Error sending request to settle: settlement 2 rejected"
    );
    assert!(source.is_closed());

    let dispatched = ledger.call_count();
    assert_eq!(dispatched, 3);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(ledger.call_count(), dispatched);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_empty_source() {
    let (dispatcher, ledger) = mock_dispatcher(config(2, 2), None);
    let mut source = StreamSource::from_items(Vec::<u64>::new());

    let processed = dispatcher.process_stream(&mut source, settle).await.unwrap();

    assert_eq!(processed, 0);
    assert_eq!(ledger.call_count(), 0);
    assert_eq!(source.pause_count(), 0);
    assert_eq!(source.resume_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn every_strategy_respects_the_per_client_ceiling() {
    for strategy in [
        SelectionStrategy::Lifo,
        SelectionStrategy::RoundRobin,
        SelectionStrategy::LeastLoaded,
    ] {
        let (dispatcher, ledger) = mock_dispatcher(
            DispatchConfig {
                strategy,
                ..config(3, 2)
            },
            None,
        );

        let processed = dispatcher
            .process_stream(StreamSource::from_items(0..25_u64), settle)
            .await
            .unwrap();

        assert_eq!(processed, 25, "{strategy}");
        assert!(ledger.total_peak() <= 6, "{strategy}");
        assert!(
            ledger.peaks().iter().all(|&peak| (1..=2).contains(&peak)),
            "{strategy}: {:?}",
            ledger.peaks()
        );
    }
}

#[tokio::test(start_paused = true)]
async fn batches_share_the_pool_ceiling() {
    let (dispatcher, ledger) = mock_dispatcher(
        DispatchConfig {
            batch_size: Some(3),
            ..config(2, 1)
        },
        None,
    );

    let processed = dispatcher
        .process_batches(StreamSource::from_items(0..20_u64), |batch| {
            Some(Call::with_param("settle", "items", json!(batch)))
        })
        .await
        .unwrap();

    assert_eq!(processed, 20);
    assert_eq!(ledger.call_count(), 7);
    assert!(ledger.total_peak() <= 2);
}

#[tokio::test(start_paused = true)]
async fn push_source_drains_through_the_pool() {
    let (dispatcher, ledger) = mock_dispatcher(config(2, 1), None);
    let (emitter, source) = channel::<u64>(2);

    let producer = tokio::spawn(async move {
        for n in 0..12 {
            emitter.send(n).await.unwrap();
        }
    });

    let processed = dispatcher.process_stream(source, settle).await.unwrap();
    producer.await.unwrap();

    assert_eq!(processed, 12);
    assert_eq!(ledger.call_count(), 12);
    assert!(ledger.total_peak() <= 2);
}

async fn observe_pause_during_handler(is_await: bool) -> bool {
    let (dispatcher, _) = mock_dispatcher(
        DispatchConfig {
            is_await,
            ..config(1, 4)
        },
        None,
    );
    let (emitter, source) = channel::<u64>(1);
    let started = Arc::new(Notify::new());

    let handler_started = Arc::clone(&started);
    let session = tokio::spawn(async move {
        dispatcher
            .process_stream_with(source, settle, move |_| {
                let handler_started = Arc::clone(&handler_started);
                async move {
                    handler_started.notify_one();
                    sleep(Duration::from_millis(50)).await;
                    Ok(())
                }
            })
            .await
    });

    emitter.send(0).await.unwrap();
    started.notified().await;
    sleep(Duration::from_millis(10)).await;
    let paused = emitter.is_paused();

    sleep(Duration::from_millis(100)).await;
    assert!(!emitter.is_paused());
    drop(emitter);
    assert_eq!(session.await.unwrap().unwrap(), 1);
    paused
}

#[tokio::test(start_paused = true)]
async fn strict_mode_pauses_while_the_handler_runs() {
    assert!(observe_pause_during_handler(true).await);
}

#[tokio::test(start_paused = true)]
async fn default_mode_keeps_flowing_during_the_handler() {
    assert!(!observe_pause_during_handler(false).await);
}
