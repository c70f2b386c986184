//! Consumer-loop behavior over the embedded coordinator/client pair.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use taskgrid::{
    embedded_pair, ClaimAll, Client, Consumer, Coordinator, CoordinatorContext, HandlerError,
    HandlerFn, HandlerRef, SubmitError, Task,
};

/// Routes crate logs to the test harness when `RUST_LOG` asks for them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records which task ids were observed by handler runs.
#[derive(Clone, Default)]
struct RunCounter(Arc<Mutex<Vec<String>>>);

impl RunCounter {
    fn add(&self, id: &str) {
        self.0.lock().unwrap().push(id.to_string());
    }

    fn runs(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Handler that records the task id and completes immediately.
fn counting_handler(counter: &RunCounter) -> HandlerRef {
    let counter = counter.clone();
    HandlerFn::arc("count", move |task: Task, _stop: CancellationToken| {
        let counter = counter.clone();
        async move {
            counter.add(task.id());
            Ok::<bool, HandlerError>(true)
        }
    })
}

/// Handler that blocks until stopped, then records the task id.
fn blocking_handler(counter: &RunCounter) -> HandlerRef {
    let counter = counter.clone();
    HandlerFn::arc("block", move |task: Task, stop: CancellationToken| {
        let counter = counter.clone();
        async move {
            tokio::select! {
                _ = stop.cancelled() => {
                    counter.add(task.id());
                    Ok(true)
                }
                _ = sleep(Duration::from_secs(3)) => Err(HandlerError::Timeout {
                    timeout: Duration::from_secs(3),
                }),
            }
        }
    })
}

async fn wait_for_running(consumer: &Consumer, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while consumer.tasks().await.len() != count {
        assert!(
            Instant::now() < deadline,
            "expected {count} running tasks, have {:?}",
            consumer.tasks().await
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn four_tasks_each_run_once() {
    init_tracing();
    let counter = RunCounter::default();
    let (coord, client) = embedded_pair("testnode");
    let consumer = Arc::new(Consumer::new(coord, counting_handler(&counter), Arc::new(ClaimAll)));

    let run = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.run().await })
    };

    for id in ["one", "two", "three", "four"] {
        client.submit_task(Task::new(id)).await.unwrap();
    }

    sleep(Duration::from_millis(200)).await;
    consumer.shutdown().await;
    run.await.unwrap().unwrap();

    let mut runs = counter.runs();
    runs.sort_unstable();
    assert_eq!(runs, ["four", "one", "three", "two"]);
}

#[tokio::test]
async fn deleted_tasks_stop_blocked_handlers() {
    init_tracing();
    let counter = RunCounter::default();
    let (coord, client) = embedded_pair("testnode");
    let consumer = Arc::new(Consumer::new(coord, blocking_handler(&counter), Arc::new(ClaimAll)));

    let run = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.run().await })
    };

    let ids = ["one", "two", "three", "four"];
    for id in ids {
        client.submit_task(Task::new(id)).await.unwrap();
    }
    wait_for_running(&consumer, ids.len()).await;

    for id in ids {
        client.delete_task(id).await.unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while counter.runs().len() != ids.len() {
        assert!(
            Instant::now() < deadline,
            "handlers not stopped, runs: {:?}",
            counter.runs()
        );
        sleep(Duration::from_millis(10)).await;
    }

    consumer.shutdown().await;
    run.await.unwrap().unwrap();

    let mut runs = counter.runs();
    runs.sort_unstable();
    assert_eq!(runs, ["four", "one", "three", "two"]);
}

#[tokio::test]
async fn duplicate_submission_is_an_error() {
    init_tracing();
    let (_coord, client) = embedded_pair("testnode");

    client.submit_task(Task::new("dup")).await.unwrap();
    let err = client.submit_task(Task::new("dup")).await.unwrap_err();
    assert!(matches!(err, SubmitError::TaskExists { .. }));
}

#[tokio::test]
async fn release_allows_immediate_reclaim() {
    init_tracing();
    let (coord, client) = embedded_pair("testnode");

    let (lost_tx, _lost_rx) = mpsc::unbounded_channel();
    let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();
    coord
        .init(CoordinatorContext::new(lost_tx, fatal_tx))
        .await
        .unwrap();

    let task = Task::new("t4");
    client.submit_task(task.clone()).await.unwrap();

    assert!(coord.claim(&task).await);
    assert!(!coord.claim(&task).await, "claim must be exclusive");

    coord.release(&task).await;
    assert!(coord.claim(&task).await, "released task must be reclaimable");

    coord.close().await;
}

#[tokio::test]
async fn snapshot_lists_running_tasks_sorted() {
    init_tracing();
    let counter = RunCounter::default();
    let (coord, client) = embedded_pair("testnode");
    let consumer = Arc::new(Consumer::new(coord, blocking_handler(&counter), Arc::new(ClaimAll)));

    let run = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.run().await })
    };

    client.submit_task(Task::new("beta")).await.unwrap();
    client.submit_task(Task::new("alpha")).await.unwrap();
    wait_for_running(&consumer, 2).await;

    assert_eq!(consumer.tasks().await, ["alpha", "beta"]);

    consumer.shutdown().await;
    run.await.unwrap().unwrap();
    assert!(consumer.tasks().await.is_empty());
}
