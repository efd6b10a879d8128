use futures_util::{stream, StreamExt};
use latest_flow::{
    FlowError, LatestFlowTransformer, LatestStream, SupersededErrorPolicy, TransformLatestExt,
    TransformerConfig, TransformerState,
};
use pretty_assertions::assert_eq;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Barrier,
    },
    time::Duration,
};
use tokio::{sync::Notify, task::block_in_place, time::sleep};

fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter("info,latest_flow=trace")
        .without_time()
        .with_test_writer()
        .try_init();
}

/// Flips a flag when dropped, so a test can see a run's future go away.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn transform_error_ends_the_stream_once() {
    init_tracing();

    let upstream = stream::iter([1, 2, 3]).then(|value| async move {
        sleep(Duration::from_millis(10)).await;
        value
    });

    let mut downstream = upstream.transform_latest(|value, cx| async move {
        cx.emit(value.to_string()).await;
        match value {
            2 => Err("bad 2"),
            _ => Ok(()),
        }
    });

    let mut items = vec![];
    while let Some(item) = downstream.next().await {
        items.push(item);
    }

    assert_eq!(items.len(), 3);
    assert_eq!(items[0], Ok("1".to_string()));
    assert_eq!(items[1], Ok("2".to_string()));

    let err = items[2].clone().unwrap_err();
    assert!(matches!(err, FlowError::Transform { error: "bad 2", .. }));
    assert_eq!(err.epoch().map(|epoch| epoch.get()), Some(2));
    assert_eq!(err.to_string(), "transform for epoch #2 failed: bad 2");

    assert_eq!(downstream.state(), TransformerState::Failed);
}

#[tokio::test(start_paused = true)]
async fn upstream_error_cancels_the_active_run() {
    init_tracing();

    let dropped = Arc::new(AtomicBool::new(false));
    let upstream = stream::iter([Ok(1), Err("upstream broke")]);

    let mut downstream = upstream.try_transform_latest({
        let dropped = dropped.clone();
        move |_value: u32, _cx| {
            let flag = DropFlag(dropped.clone());
            async move {
                let _flag = flag;
                std::future::pending::<()>().await;
                Ok::<(), &str>(())
            }
        }
    });

    let items: Vec<Result<String, _>> = downstream.by_ref().collect().await;
    assert_eq!(items, vec![Err(FlowError::Upstream("upstream broke"))]);
    assert_eq!(downstream.state(), TransformerState::Failed);

    while !dropped.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_run_is_reported() {
    init_tracing();

    let items: Vec<_> = stream::iter([1])
        .transform_latest(|value: u32, cx| async move {
            cx.emit(value).await;
            if value == 1 {
                panic!("run for {value} gave up");
            }
            Ok::<(), String>(())
        })
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Ok(1));
    assert!(matches!(items[1], Err(FlowError::Panicked(epoch)) if epoch.get() == 1));
}

#[tokio::test(start_paused = true)]
async fn panicking_upstream_ends_the_stream() {
    init_tracing();

    let items: Vec<_> = stream::iter([1u32, 2])
        .map(|value| {
            if value == 2 {
                panic!("upstream gave up at {value}");
            }
            value
        })
        .transform_latest(|value, cx| async move {
            cx.emit(value).await;
            Ok::<(), String>(())
        })
        .collect()
        .await;

    assert_eq!(items, vec![Ok(1), Err(FlowError::UpstreamPanicked)]);
}

#[tokio::test(start_paused = true)]
async fn panic_while_building_a_run_is_reported() {
    init_tracing();

    let mut downstream = stream::iter([1u32, 2]).transform_latest(|value, cx| {
        if value == 2 {
            panic!("no run for {value}");
        }
        async move {
            cx.emit(value).await;
            Ok::<(), String>(())
        }
    });

    let mut items = vec![];
    while let Some(item) = downstream.next().await {
        items.push(item);
    }

    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Ok(1));
    assert!(matches!(items[1], Err(FlowError::Panicked(epoch)) if epoch.get() == 2));
    assert_eq!(downstream.state(), TransformerState::Failed);
}

/// Run 1 fails only after run 2 has taken over.
///
/// Run 1 parks itself inside a blocking handshake mid-poll, so its cancellation cannot drop it.
/// Value 2 is only released once run 1 is parked, and run 2 completes the handshake during its
/// first poll, when epoch 2 is already current.
fn fail_after_being_superseded(config: TransformerConfig) -> LatestStream<u32, String> {
    let parked = Arc::new(Notify::new());
    let handshake = Arc::new(Barrier::new(2));

    let upstream = stream::iter([1u32, 2]).then({
        let parked = parked.clone();
        move |value| {
            let parked = parked.clone();
            async move {
                if value == 2 {
                    parked.notified().await;
                }
                Ok::<_, String>(value)
            }
        }
    });

    LatestFlowTransformer::new(config).subscribe(upstream, move |value: u32, cx| {
        let parked = parked.clone();
        let handshake = handshake.clone();
        async move {
            if value == 1 {
                tokio::task::yield_now().await;
                parked.notify_one();
                block_in_place(|| handshake.wait());
                return Err("too late".to_string());
            }
            block_in_place(|| handshake.wait());
            cx.emit(value).await;
            Ok(())
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discarded_errors_from_superseded_runs_do_not_fail_the_stream() {
    init_tracing();

    let config = TransformerConfig::new()
        .with_label("discard")
        .with_superseded_errors(SupersededErrorPolicy::Discard);

    let mut downstream = fail_after_being_superseded(config);
    let mut values = vec![];
    while let Some(value) = downstream.next().await {
        values.push(value);
    }

    assert_eq!(values, vec![Ok::<u32, FlowError<String>>(2)]);
    assert_eq!(downstream.state(), TransformerState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn superseded_errors_are_propagated_by_default() {
    init_tracing();

    let mut downstream = fail_after_being_superseded(TransformerConfig::new());
    let mut items = vec![];
    while let Some(item) = downstream.next().await {
        items.push(item);
    }

    // Run 2 may or may not get its value out before run 1's failure closes the stream.
    assert_eq!(items.iter().filter(|item| item.is_err()).count(), 1);
    assert!(matches!(
        items.last(),
        Some(Err(FlowError::Transform { epoch, error })) if epoch.get() == 1 && error == "too late"
    ));
    assert_eq!(downstream.state(), TransformerState::Failed);
}
