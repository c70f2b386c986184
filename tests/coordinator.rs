//! Coordinator behavior against the in-memory store: joining, watching,
//! claim contention, release hand-off, liveness cleanup, TTL expiry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use taskgrid::{
    ClaimAll, Client, Config, Consumer, Coordinator, CoordinatorContext, CoordinatorError,
    HandlerError, HandlerFn, HandlerRef, KvClient, KvCoordinator, KvStore, MemoryStore, Task,
};

const NAMESPACE: &str = "/taskgrid-test";

/// Routes crate logs to the test harness when `RUST_LOG` asks for them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(name: &str) -> Config {
    Config::new(NAMESPACE, name)
}

/// Context whose signal receivers are kept alive but unobserved.
fn context() -> (
    CoordinatorContext,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedReceiver<CoordinatorError>,
) {
    let (lost_tx, lost_rx) = mpsc::unbounded_channel();
    let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
    (CoordinatorContext::new(lost_tx, fatal_tx), lost_rx, fatal_rx)
}

fn spawn_watch(
    coord: &Arc<KvCoordinator<MemoryStore>>,
) -> (
    mpsc::Receiver<Task>,
    tokio::task::JoinHandle<Result<(), CoordinatorError>>,
) {
    let (tx, rx) = mpsc::channel(16);
    let coord = Arc::clone(coord);
    let join = tokio::spawn(async move { coord.watch(tx).await });
    (rx, join)
}

#[tokio::test]
async fn first_node_join_creates_subtrees() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coord = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let (ctx, _lost, _fatal) = context();
    coord.init(ctx).await.unwrap();

    let tasks = store
        .get(&format!("{NAMESPACE}/tasks"), false)
        .await
        .unwrap()
        .node
        .expect("tasks subtree should exist after the first join");
    assert!(tasks.dir);

    let nodes = store
        .get(&format!("{NAMESPACE}/nodes"), false)
        .await
        .unwrap()
        .node
        .expect("nodes subtree should exist after the first join");
    assert!(nodes.dir);

    coord.close().await;
}

#[tokio::test]
async fn watch_delivers_submitted_task_and_returns_on_close() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coord = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let (ctx, _lost, _fatal) = context();
    coord.init(ctx).await.unwrap();

    let (mut rx, watch) = spawn_watch(&coord);

    let client = KvClient::new(NAMESPACE, Arc::clone(&store));
    client.submit_task(Task::new("test-task")).await.unwrap();

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watch failed to see task within 5 seconds")
        .expect("watch channel closed early");
    assert_eq!(received.id(), "test-task");

    coord.close().await;
    watch.await.unwrap().unwrap();
}

#[tokio::test]
async fn each_submitted_task_is_claimed_exactly_once() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coord = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let (ctx, _lost, _fatal) = context();
    coord.init(ctx).await.unwrap();

    let (mut rx, watch) = spawn_watch(&coord);
    let client = KvClient::new(NAMESPACE, Arc::clone(&store));

    for id in ["test1", "test2", "test3"] {
        client.submit_task(Task::new(id)).await.unwrap();

        let received = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watch failed to see task")
            .expect("watch channel closed early");
        assert!(
            ["test1", "test2", "test3"].contains(&received.id()),
            "received unknown task {received}"
        );
        assert!(coord.claim(&received).await, "first claim must win");
        assert!(!coord.claim(&received).await, "second claim must lose");
    }

    coord.close().await;
    watch.await.unwrap().unwrap();
}

#[tokio::test]
async fn only_one_coordinator_wins_a_contested_claim() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coord1 = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let coord2 = KvCoordinator::new(config("node2"), Arc::clone(&store));
    let (ctx1, _lost1, _fatal1) = context();
    let (ctx2, _lost2, _fatal2) = context();
    coord1.init(ctx1).await.unwrap();
    coord2.init(ctx2).await.unwrap();

    let (mut rx1, watch1) = spawn_watch(&coord1);
    let (mut rx2, watch2) = spawn_watch(&coord2);

    let client = KvClient::new(NAMESPACE, Arc::clone(&store));
    for id in ["contested1", "contested2", "contested3"] {
        client.submit_task(Task::new(id)).await.unwrap();
    }

    // Watch delivery order across nodes is not guaranteed; only claim
    // exclusivity is.
    let t1 = timeout(Duration::from_secs(5), rx1.recv())
        .await
        .expect("coordinator1 watch saw nothing")
        .expect("watch channel closed early");
    let _t2 = timeout(Duration::from_secs(5), rx2.recv())
        .await
        .expect("coordinator2 watch saw nothing")
        .expect("watch channel closed early");

    assert!(coord1.claim(&t1).await, "coordinator1 should win its claim");
    assert!(
        !coord2.claim(&t1).await,
        "coordinator2 claimed a task coordinator1 already owns"
    );

    coord1.close().await;
    watch1.await.unwrap().unwrap();
    coord2.close().await;
    watch2.await.unwrap().unwrap();
}

#[tokio::test]
async fn released_task_hands_off_to_second_coordinator() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let client = KvClient::new(NAMESPACE, Arc::clone(&store));

    // Submitted before any coordinator exists.
    client.submit_task(Task::new("testtask4")).await.unwrap();

    let coord1 = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let (ctx1, _lost1, _fatal1) = context();
    coord1.init(ctx1).await.unwrap();
    let (mut rx1, watch1) = spawn_watch(&coord1);

    let task = timeout(Duration::from_secs(5), rx1.recv())
        .await
        .expect("pre-submitted task was not delivered")
        .expect("watch channel closed early");
    assert_eq!(task.id(), "testtask4");
    assert!(coord1.claim(&task).await);

    let coord2 = KvCoordinator::new(config("node2"), Arc::clone(&store));
    let (ctx2, _lost2, _fatal2) = context();
    coord2.init(ctx2).await.unwrap();
    let (mut rx2, watch2) = spawn_watch(&coord2);

    // While coordinator1 holds the claim, coordinator2 must not win one.
    let deadline = Instant::now() + Duration::from_millis(200);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rx2.recv()).await {
            Ok(Some(offered)) => {
                assert!(
                    !coord2.claim(&offered).await,
                    "claim succeeded while the task was already owned"
                );
            }
            _ => break,
        }
    }

    coord1.release(&task).await;

    let handed_off = timeout(Duration::from_secs(5), rx2.recv())
        .await
        .expect("released task was not re-offered")
        .expect("watch channel closed early");
    assert_eq!(handed_off.id(), "testtask4");
    assert!(
        coord2.claim(&handed_off).await,
        "claim on a released task should succeed"
    );

    coord1.close().await;
    watch1.await.unwrap().unwrap();
    coord2.close().await;
    watch2.await.unwrap().unwrap();
}

#[tokio::test]
async fn payload_survives_enumeration_and_live_watch() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let client = KvClient::new(NAMESPACE, Arc::clone(&store));

    // Enumeration path: submitted before any coordinator exists.
    client
        .submit_task(Task::with_payload("stored", r#"{"kind":"resize"}"#))
        .await
        .unwrap();

    let coord = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let (ctx, _lost, _fatal) = context();
    coord.init(ctx).await.unwrap();
    let (mut rx, watch) = spawn_watch(&coord);

    let stored = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("pre-submitted task was not delivered")
        .expect("watch channel closed early");
    assert_eq!(stored.id(), "stored");
    assert_eq!(stored.payload(), Some(r#"{"kind":"resize"}"#));

    // Live-watch path: submitted while the watch is running.
    client
        .submit_task(Task::with_payload("live", "shard=7"))
        .await
        .unwrap();

    let live = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("live task was not delivered")
        .expect("watch channel closed early");
    assert_eq!(live.id(), "live");
    assert_eq!(live.payload(), Some("shard=7"));

    // A duplicate id is still rejected when the first submission carried a
    // payload.
    let err = client
        .submit_task(Task::new("stored"))
        .await
        .unwrap_err();
    assert!(matches!(err, taskgrid::SubmitError::TaskExists { .. }));

    coord.close().await;
    watch.await.unwrap().unwrap();
}

#[tokio::test]
async fn close_removes_own_node_entry_only() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coord1 = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let coord2 = KvCoordinator::new(config("node2"), Arc::clone(&store));
    let (ctx1, _lost1, _fatal1) = context();
    let (ctx2, _lost2, _fatal2) = context();
    coord1.init(ctx1).await.unwrap();
    coord2.init(ctx2).await.unwrap();

    let node1 = format!("{NAMESPACE}/nodes/coordinator1");
    let node2 = format!("{NAMESPACE}/nodes/node2");
    for path in [&node1, &node2] {
        let node = store
            .get(path, false)
            .await
            .unwrap()
            .node
            .expect("node entry should exist after init");
        assert!(node.dir, "{path} is not a directory");
    }

    coord1.close().await;

    assert!(
        store.get(&node1, false).await.unwrap().node.is_none(),
        "closed coordinator left its node entry behind"
    );
    assert!(
        store.get(&node2, false).await.unwrap().node.is_some(),
        "close removed another node's entry"
    );

    coord2.close().await;
}

#[tokio::test]
async fn duplicate_node_name_is_rejected_at_init() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let coord1 = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let coord2 = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let (ctx1, _lost1, _fatal1) = context();
    let (ctx2, _lost2, _fatal2) = context();

    coord1.init(ctx1).await.unwrap();
    let err = coord2.init(ctx2).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NameCollision { .. }));

    coord1.close().await;
}

/// Handler that never runs (no tasks are ever submitted).
fn noop_handler() -> HandlerRef {
    HandlerFn::arc("noop", |_task: Task, _stop: CancellationToken| async move {
        Ok::<bool, HandlerError>(true)
    })
}

#[tokio::test]
async fn node_refresher_keeps_ttl_and_failure_stops_consumer() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let mut cfg = config("coordinator1");
    cfg.node_ttl = Duration::from_secs(3);
    let coord = KvCoordinator::new(cfg, Arc::clone(&store));
    let consumer = Arc::new(Consumer::new(coord, noop_handler(), Arc::new(ClaimAll)));

    let run = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.run().await })
    };

    let node_path = format!("{NAMESPACE}/nodes/coordinator1");
    let read_ttl = |store: Arc<MemoryStore>, path: String| async move {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if let Some(node) = store.get(&path, false).await.unwrap().node {
                if node.dir {
                    return node.ttl.expect("node directory should carry a TTL");
                }
            }
            assert!(Instant::now() < deadline, "node path {path} not found");
            sleep(Duration::from_millis(100)).await;
        }
    };

    let ttl = read_ttl(Arc::clone(&store), node_path.clone()).await;
    assert!((1..=3).contains(&ttl), "TTL out of range: {ttl}");

    // Survive one full TTL: the refresher must have extended it.
    sleep(Duration::from_secs(ttl)).await;
    let ttl = read_ttl(Arc::clone(&store), node_path.clone()).await;
    assert!((1..=3).contains(&ttl), "TTL out of range after refresh: {ttl}");
    assert!(!run.is_finished(), "consumer exited while liveness was fine");

    // Pull the node directory out from under the refresher.
    store.delete(&node_path, true).await.unwrap();

    let result = timeout(Duration::from_secs(10), run)
        .await
        .expect("consumer did not exit after losing its node directory")
        .unwrap();
    assert!(result.is_err(), "liveness loss must surface as an error");
}

#[tokio::test]
async fn expired_foreign_claim_is_reclaimed() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());

    // A claim owned by a node that will never refresh it.
    store
        .create_if_absent(
            &format!("{NAMESPACE}/tasks/abc/owner"),
            Some(r#"{"node":"--"}"#),
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    let (claimed_tx, mut claimed_rx) = mpsc::unbounded_channel();
    let handler: HandlerRef = HandlerFn::arc("grab", move |task: Task, stop: CancellationToken| {
        let claimed_tx = claimed_tx.clone();
        async move {
            let _ = claimed_tx.send(task.id().to_string());
            stop.cancelled().await;
            Ok::<bool, HandlerError>(true)
        }
    });

    let coord = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let consumer = Arc::new(Consumer::new(coord, handler, Arc::new(ClaimAll)));
    let run = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.run().await })
    };

    let reclaimed = timeout(Duration::from_secs(5), claimed_rx.recv())
        .await
        .expect("task not reclaimed long after its claim expired")
        .expect("claim channel closed early");
    assert_eq!(reclaimed, "abc");
    assert_eq!(consumer.tasks().await, ["abc"]);

    consumer.shutdown().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn external_delete_stops_the_owning_handler() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let client = KvClient::new(NAMESPACE, Arc::clone(&store));

    let handler: HandlerRef = HandlerFn::arc("hold", |_task: Task, stop: CancellationToken| {
        async move {
            stop.cancelled().await;
            Ok::<bool, HandlerError>(false)
        }
    });

    let coord = KvCoordinator::new(config("coordinator1"), Arc::clone(&store));
    let consumer = Arc::new(Consumer::new(coord, handler, Arc::new(ClaimAll)));
    let run = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.run().await })
    };

    client.submit_task(Task::new("doomed")).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while consumer.tasks().await != ["doomed"] {
        assert!(Instant::now() < deadline, "task never claimed");
        sleep(Duration::from_millis(10)).await;
    }

    client.delete_task("doomed").await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !consumer.tasks().await.is_empty() {
        assert!(Instant::now() < deadline, "handler not stopped by delete");
        sleep(Duration::from_millis(10)).await;
    }

    // The deletion must not have been undone by a release.
    let gone = store
        .get(&format!("{NAMESPACE}/tasks/doomed"), true)
        .await
        .unwrap()
        .node
        .is_none();
    assert!(gone, "deleted task reappeared in the store");

    consumer.shutdown().await;
    run.await.unwrap().unwrap();
}
