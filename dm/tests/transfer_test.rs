//! Integration tests for the transfer coordinator
//!
//! These tests run two or three coordinators on an in-process network and
//! verify end-to-end transfer, fan-out, admission and shutdown behavior.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::watch;

use datamover::binding::BindingObjectDescriptor;
use datamover::coordinator::{Coordinator, CoordinatorConfig};
use datamover::domain::{DataKind, DataLocation, DataSource, TransferKind, TransferOutcome, TransferRequest, TransferTicket};
use datamover::error::TransferError;
use datamover::node::TransferNode;
use datamover::store::{DataStore, FsDataStore, LocalValue, ReceivedValue, RelocatedPathFallback};
use datamover::transport::LocalNetwork;

// =============================================================================
// Fixtures
// =============================================================================

/// File-system store that counts writes and can hold lookups and writes
/// behind gates
struct TestStore {
    inner: FsDataStore,
    gate: watch::Sender<bool>,
    persist_gate: watch::Sender<bool>,
    failing_duplicates: AtomicBool,
    persists: AtomicUsize,
    duplicates: AtomicUsize,
}

impl TestStore {
    fn new(dir: PathBuf, open: bool) -> Arc<Self> {
        let (gate, _) = watch::channel(open);
        let (persist_gate, _) = watch::channel(true);
        Arc::new(Self {
            inner: FsDataStore::new(dir),
            gate,
            persist_gate,
            failing_duplicates: AtomicBool::new(false),
            persists: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
        })
    }

    fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    fn hold_persists(&self) {
        self.persist_gate.send_replace(false);
    }

    fn release_persists(&self) {
        self.persist_gate.send_replace(true);
    }

    fn fail_duplicates(&self) {
        self.failing_duplicates.store(true, Ordering::SeqCst);
    }

    fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for TestStore {
    fn target_path(&self, target: &str) -> PathBuf {
        self.inner.target_path(target)
    }

    async fn resolve(&self, source_id: &str, kind: DataKind) -> Result<LocalValue, TransferError> {
        let mut rx = self.gate.subscribe();
        let _ = rx.wait_for(|open| *open).await;
        self.inner.resolve(source_id, kind).await
    }

    async fn read_binding_buffer(&self, descriptor: &BindingObjectDescriptor) -> Result<Vec<u8>, TransferError> {
        self.inner.read_binding_buffer(descriptor).await
    }

    async fn export_native(&self, descriptor: &BindingObjectDescriptor) -> Result<Vec<u8>, TransferError> {
        self.inner.export_native(descriptor).await
    }

    async fn materialize_binding(&self, descriptor: &BindingObjectDescriptor) -> Result<PathBuf, TransferError> {
        self.inner.materialize_binding(descriptor).await
    }

    async fn persist(&self, target: &str, value: ReceivedValue) -> Result<(), TransferError> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.persist_gate.subscribe();
        let _ = rx.wait_for(|open| *open).await;
        self.inner.persist(target, value).await
    }

    async fn duplicate(&self, from: &str, to: &str, kind: TransferKind) -> Result<(), TransferError> {
        self.duplicates.fetch_add(1, Ordering::SeqCst);
        if self.failing_duplicates.load(Ordering::SeqCst) {
            return Err(TransferError::Io(format!("disk full copying {} to {}", from, to)));
        }
        self.inner.duplicate(from, to, kind).await
    }
}

struct Cluster {
    _temp: TempDir,
    network: Arc<LocalNetwork>,
    holder: TransferNode,
    requester: TransferNode,
    holder_store: Arc<TestStore>,
    requester_store: Arc<TestStore>,
}

impl Cluster {
    fn holder(&self) -> &Arc<Coordinator> {
        self.holder.coordinator()
    }

    fn requester(&self) -> &Arc<Coordinator> {
        self.requester.coordinator()
    }

    async fn request(&self, request: TransferRequest) -> TransferTicket {
        self.requester().add_transfer_request(request).await
    }
}

struct ClusterOptions {
    holder: CoordinatorConfig,
    requester: CoordinatorConfig,
    gated: bool,
    chunk_size: usize,
    fallback_dirs: Vec<PathBuf>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            holder: CoordinatorConfig::default(),
            requester: CoordinatorConfig::default(),
            gated: false,
            chunk_size: 64 * 1024,
            fallback_dirs: Vec::new(),
        }
    }
}

fn cluster(options: ClusterOptions) -> Cluster {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let network = LocalNetwork::new(options.chunk_size);

    let holder_store = TestStore::new(temp.path().join("holder"), !options.gated);
    let requester_store = TestStore::new(temp.path().join("requester"), true);

    let holder = TransferNode::spawn_local_with_fallback(
        &network,
        "holder",
        options.holder,
        Arc::clone(&holder_store) as Arc<dyn DataStore>,
        Arc::new(RelocatedPathFallback::new(options.fallback_dirs)),
    )
    .expect("Failed to start holder");
    let requester = TransferNode::spawn_local(
        &network,
        "requester",
        options.requester,
        Arc::clone(&requester_store) as Arc<dyn DataStore>,
    )
    .expect("Failed to start requester");

    Cluster {
        _temp: temp,
        network,
        holder,
        requester,
        holder_store,
        requester_store,
    }
}

fn file(source: &str, target: &str) -> TransferRequest {
    TransferRequest::file(DataSource::at(source, "holder"), target)
}

async fn wait(ticket: TransferTicket) -> TransferOutcome {
    tokio::time::timeout(Duration::from_secs(5), ticket.wait())
        .await
        .expect("ticket timed out")
}

/// Poll until `check` holds or the deadline passes
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Dedup and fan-out
// =============================================================================

#[tokio::test]
async fn test_dedup_issues_one_demand_per_source() {
    let c = cluster(ClusterOptions {
        gated: true,
        ..Default::default()
    });
    c.holder_store.inner.put_file("d1", b"one").await.unwrap();

    let tickets = vec![
        c.request(file("d1", "d1")).await,
        c.request(file("d1", "d1")).await,
        c.request(file("d1", "d1_b")).await,
        c.request(file("d1", "d1_c")).await,
    ];

    let metrics = c.requester().metrics();
    assert_eq!(metrics.demands_issued, 1);
    assert_eq!(metrics.coalesced_requests, 3);

    c.holder_store.open_gate();
    for ticket in tickets {
        assert!(wait(ticket).await.is_ok());
    }

    assert_eq!(c.requester().metrics().demands_issued, 1);
    assert_eq!(c.requester().metrics().deliveries, 4);
    eventually(|| async { c.holder().metrics().demands_served == 1 }).await;
}

#[tokio::test]
async fn test_target_collapsing_copies_locally() {
    let c = cluster(ClusterOptions {
        gated: true,
        ..Default::default()
    });
    c.holder_store.inner.put_file("d5", b"payload").await.unwrap();

    let original = c.request(file("d5", "d5")).await;
    let copy = c.request(file("d5", "d5_copy")).await;
    c.holder_store.open_gate();

    let original = wait(original).await.unwrap();
    let copy = wait(copy).await.unwrap();
    assert_eq!(original.target, "d5");
    assert!(!original.local_copy);
    assert_eq!(copy.target, "d5_copy");
    assert!(copy.local_copy);

    assert_eq!(c.requester_store.persists(), 1);
    assert_eq!(c.requester_store.duplicates(), 1);
    assert_eq!(c.requester_store.inner.read_file("d5").await.unwrap(), b"payload");
    assert_eq!(c.requester_store.inner.read_file("d5_copy").await.unwrap(), b"payload");

    let metrics = c.requester().metrics();
    assert_eq!(metrics.demands_issued, 1);
    assert_eq!(metrics.local_copies, 1);
}

#[tokio::test]
async fn test_identical_targets_write_once() {
    let c = cluster(ClusterOptions {
        gated: true,
        ..Default::default()
    });
    c.holder_store.inner.put_file("d5", b"payload").await.unwrap();

    let a = c.request(file("d5", "d5")).await;
    let b = c.request(file("d5", "d5")).await;
    c.holder_store.open_gate();

    assert!(!wait(a).await.unwrap().local_copy);
    assert!(!wait(b).await.unwrap().local_copy);
    assert_eq!(c.requester_store.persists(), 1);
    assert_eq!(c.requester_store.duplicates(), 0);
}

#[tokio::test]
async fn test_later_request_after_delivery_fetches_again() {
    let c = cluster(ClusterOptions::default());
    c.holder_store.inner.put_file("d2", b"v").await.unwrap();

    assert!(wait(c.request(file("d2", "d2")).await).await.is_ok());
    assert!(wait(c.request(file("d2", "d2_again")).await).await.is_ok());
    assert_eq!(c.requester().metrics().demands_issued, 2);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_missing_value_fails_every_consumer() {
    let c = cluster(ClusterOptions {
        gated: true,
        ..Default::default()
    });

    let a = c.request(file("ghost", "ghost")).await;
    let b = c.request(file("ghost", "ghost_copy")).await;
    c.holder_store.open_gate();

    let a = wait(a).await.unwrap_err();
    let b = wait(b).await.unwrap_err();
    assert!(matches!(a.error, TransferError::DataNotAvailable { .. }));
    assert_eq!(a.source_id, "ghost");
    assert_eq!(a.targets, vec!["ghost".to_string()]);
    assert_eq!(b.targets, vec!["ghost_copy".to_string()]);

    eventually(|| async { !c.requester().has_pending_transfers().await }).await;
    eventually(|| async { !c.holder().has_pending_transfers().await }).await;
    assert_eq!(c.holder().metrics().not_available_sent, 1);
}

#[tokio::test]
async fn test_unreachable_location_is_connection_fault() {
    let c = cluster(ClusterOptions::default());

    let ticket = c
        .request(TransferRequest::file(DataSource::at("d1", "nowhere"), "d1"))
        .await;
    let failure = wait(ticket).await.unwrap_err();
    assert!(matches!(failure.error, TransferError::ConnectionFault(_)));
    assert_eq!(c.requester().queue_state().await.receive_slots_in_use, 0);
}

#[tokio::test]
async fn test_second_location_used_when_first_unreachable() {
    let c = cluster(ClusterOptions::default());
    c.holder_store.inner.put_file("d3", b"x").await.unwrap();

    let source = DataSource::new("d3", vec![DataLocation::new("nowhere"), DataLocation::new("holder")]);
    let ticket = c.request(TransferRequest::file(source, "d3")).await;
    assert!(wait(ticket).await.is_ok());
}

#[tokio::test]
async fn test_malformed_binding_never_demands() {
    let c = cluster(ClusterOptions::default());

    let ticket = c
        .request(TransferRequest::binding(DataSource::at("no-delimiter", "holder"), "t"))
        .await;
    let failure = wait(ticket).await.unwrap_err();
    assert!(matches!(failure.error, TransferError::MalformedIdentifier { .. }));
    assert!(failure.error.is_unavailable());
    assert_eq!(c.requester().metrics().demands_issued, 0);
}

#[tokio::test]
async fn test_failure_does_not_disturb_other_sources() {
    let c = cluster(ClusterOptions::default());
    c.holder_store.inner.put_file("good", b"ok").await.unwrap();

    let bad = c.request(file("bad", "bad")).await;
    let good = c.request(file("good", "good")).await;

    assert!(wait(bad).await.is_err());
    assert!(wait(good).await.is_ok());
}

#[tokio::test]
async fn test_failed_local_copy_fails_every_consumer() {
    let c = cluster(ClusterOptions {
        gated: true,
        ..Default::default()
    });
    c.holder_store.inner.put_file("d5", b"payload").await.unwrap();
    c.requester_store.fail_duplicates();

    let first = c.request(file("d5", "d5")).await;
    let second = c.request(file("d5", "d5")).await;
    let copy = c.request(file("d5", "d5_copy")).await;
    c.holder_store.open_gate();

    let first = wait(first).await.unwrap_err();
    let second = wait(second).await.unwrap_err();
    let copy = wait(copy).await.unwrap_err();

    // The primary target was written, but nobody is told it succeeded
    assert_eq!(c.requester_store.persists(), 1);
    assert_eq!(first.targets, vec!["d5".to_string()]);
    assert_eq!(second.targets, vec!["d5".to_string()]);
    assert_eq!(copy.targets, vec!["d5_copy".to_string()]);
    assert!(matches!(copy.error, TransferError::Io(_)));
    assert_eq!(first.error, copy.error);

    let metrics = c.requester().metrics();
    assert_eq!(metrics.deliveries, 0);
    assert_eq!(metrics.local_copies, 0);
    assert_eq!(metrics.failures, 3);
    eventually(|| async { !c.requester().has_pending_transfers().await }).await;
}

// =============================================================================
// Value kinds
// =============================================================================

#[tokio::test]
async fn test_object_transfer() {
    let c = cluster(ClusterOptions::default());
    c.holder_store.inner.put_object("o1", json!({"rows": [1, 2, 3]})).await;

    let ticket = c
        .request(TransferRequest::object(DataSource::at("o1", "holder"), "o1"))
        .await;
    assert!(wait(ticket).await.is_ok());
    assert_eq!(c.requester_store.inner.object("o1").await, Some(json!({"rows": [1, 2, 3]})));
}

#[tokio::test]
async fn test_serialized_object_falls_back_to_file() {
    let c = cluster(ClusterOptions::default());
    c.holder_store.inner.put_file("o2", b"{\"serialized\":true}").await.unwrap();

    let ticket = c
        .request(TransferRequest::object(DataSource::at("o2", "holder"), "o2"))
        .await;
    assert!(wait(ticket).await.is_ok());
    assert_eq!(
        c.requester_store.inner.read_file("o2").await.unwrap(),
        b"{\"serialized\":true}"
    );
}

#[tokio::test]
async fn test_binding_raw_buffer_in_frames() {
    let c = cluster(ClusterOptions {
        chunk_size: 4,
        ..Default::default()
    });
    let bytes: Vec<u8> = (0..10).collect();
    c.holder_store.inner.put_binding("m", bytes.clone()).await;

    let ticket = c
        .request(TransferRequest::binding(DataSource::at("m#3#10", "holder"), "m#3#10"))
        .await;
    assert!(wait(ticket).await.is_ok());
    assert_eq!(c.requester_store.inner.binding("m").await, Some(bytes));
}

#[tokio::test]
async fn test_binding_native_stream_in_persistent_mode() {
    let persistent = CoordinatorConfig {
        persistent_bindings: true,
        ..Default::default()
    };
    let c = cluster(ClusterOptions {
        holder: persistent.clone(),
        requester: persistent,
        ..Default::default()
    });
    c.holder_store.inner.put_binding("obj", vec![1, 1, 2, 3, 5]).await;

    let ticket = c
        .request(TransferRequest::binding(DataSource::at("obj#2#0", "holder"), "obj#2#0"))
        .await;
    assert!(wait(ticket).await.is_ok());
    assert_eq!(c.requester_store.inner.binding("obj").await, Some(vec![1, 1, 2, 3, 5]));
    assert!(!c.holder_store.inner.work_dir().join("obj.bind").exists());
}

#[tokio::test]
async fn test_binding_file_backed_when_not_persistent() {
    let c = cluster(ClusterOptions::default());
    c.holder_store.inner.put_binding("obj", vec![8, 13]).await;

    let ticket = c
        .request(TransferRequest::binding(DataSource::at("obj#2#0", "holder"), "obj#2#0"))
        .await;
    assert!(wait(ticket).await.is_ok());
    assert!(c.holder_store.inner.work_dir().join("obj.bind").exists());
    assert_eq!(c.requester_store.inner.binding("obj").await, Some(vec![8, 13]));
}

#[tokio::test]
async fn test_binding_missing_is_unavailable() {
    let c = cluster(ClusterOptions::default());

    let ticket = c
        .request(TransferRequest::binding(DataSource::at("gone#2#0", "holder"), "gone#2#0"))
        .await;
    let failure = wait(ticket).await.unwrap_err();
    assert!(matches!(failure.error, TransferError::DataNotAvailable { .. }));
}

#[tokio::test]
async fn test_relocated_file_is_served() {
    let moved = TempDir::new().unwrap();
    std::fs::write(moved.path().join("d7"), b"moved here").unwrap();

    let c = cluster(ClusterOptions {
        fallback_dirs: vec![moved.path().to_path_buf()],
        ..Default::default()
    });

    let ticket = c.request(file("d7", "d7")).await;
    assert!(wait(ticket).await.is_ok());
    assert_eq!(c.requester_store.inner.read_file("d7").await.unwrap(), b"moved here");
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test]
async fn test_receive_slots_bound_in_flight_transfers() {
    let c = cluster(ClusterOptions {
        requester: CoordinatorConfig {
            max_receive_slots: 1,
            ..Default::default()
        },
        gated: true,
        ..Default::default()
    });
    for name in ["a", "b", "c"] {
        c.holder_store.inner.put_file(name, name.as_bytes()).await.unwrap();
    }

    let tickets = vec![
        c.request(file("a", "a")).await,
        c.request(file("b", "b")).await,
        c.request(file("c", "c")).await,
    ];

    let state = c.requester().queue_state().await;
    assert_eq!(state.in_flight, 1);
    assert_eq!(state.queued, 2);
    assert_eq!(state.receive_slots_in_use, 1);

    c.holder_store.open_gate();
    for ticket in tickets {
        assert!(wait(ticket).await.is_ok());
    }
    assert_eq!(c.requester().peak_slots().0, 1);
    eventually(|| async { !c.requester().has_pending_transfers().await }).await;
}

#[tokio::test]
async fn test_demands_park_when_send_slots_full() {
    let c = cluster(ClusterOptions {
        holder: CoordinatorConfig {
            max_send_slots: 1,
            ..Default::default()
        },
        gated: true,
        ..Default::default()
    });
    for name in ["a", "b", "c"] {
        c.holder_store.inner.put_file(name, name.as_bytes()).await.unwrap();
    }

    let tickets = vec![
        c.request(file("a", "a")).await,
        c.request(file("b", "b")).await,
        c.request(file("c", "c")).await,
    ];

    eventually(|| async { c.holder().queue_state().await.parked_sends == 2 }).await;
    assert_eq!(c.holder().metrics().parked_sends, 2);

    c.holder_store.open_gate();
    for ticket in tickets {
        assert!(wait(ticket).await.is_ok());
    }
    assert_eq!(c.holder().peak_slots().1, 1);
    eventually(|| async { !c.holder().has_pending_transfers().await }).await;
}

#[tokio::test]
async fn test_receive_slot_freed_while_value_is_stored() {
    let c = cluster(ClusterOptions {
        requester: CoordinatorConfig {
            max_receive_slots: 1,
            ..Default::default()
        },
        ..Default::default()
    });
    for name in ["a", "b"] {
        c.holder_store.inner.put_file(name, name.as_bytes()).await.unwrap();
    }
    c.requester_store.hold_persists();

    let a = c.request(file("a", "a")).await;
    let b = c.request(file("b", "b")).await;

    // "a" arrived and is stuck in persist; "b" was admitted and arrived too
    eventually(|| async { c.requester().queue_state().await.delivering == 2 }).await;
    let state = c.requester().queue_state().await;
    assert_eq!(state.queued, 0);
    assert_eq!(state.in_flight, 0);
    assert_eq!(state.receive_slots_in_use, 0);
    assert_eq!(c.requester().metrics().demands_issued, 2);
    assert_eq!(c.requester().metrics().deliveries, 0);

    // Values still being stored keep the node from terminating
    assert!(c.requester().has_pending_transfers().await);
    c.requester().shutdown_local().await;
    assert!(!c.requester().is_terminated());

    c.requester_store.release_persists();
    assert!(wait(a).await.is_ok());
    assert!(wait(b).await.is_ok());
    tokio::time::timeout(Duration::from_secs(5), c.requester().wait_terminated())
        .await
        .expect("requester never terminated");
    assert_eq!(c.requester().queue_state().await.delivering, 0);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_local_shutdown_waits_for_in_flight_transfers() {
    let c = cluster(ClusterOptions {
        gated: true,
        ..Default::default()
    });
    c.holder_store.inner.put_file("d1", b"x").await.unwrap();

    let ticket = c.request(file("d1", "d1")).await;
    c.requester().shutdown_local().await;
    assert!(!c.requester().is_terminated());
    assert!(c.requester().queue_state().await.finishing);

    c.holder_store.open_gate();
    assert!(wait(ticket).await.is_ok());

    tokio::time::timeout(Duration::from_secs(5), c.requester().wait_terminated())
        .await
        .expect("requester never terminated");
    assert!(c.requester().is_terminated());
    assert!(!c.requester().has_pending_transfers().await);
}

#[tokio::test]
async fn test_remote_shutdown_acknowledged_after_drain() {
    let c = cluster(ClusterOptions {
        gated: true,
        ..Default::default()
    });
    c.holder_store.inner.put_file("d1", b"x").await.unwrap();

    let ticket = c.request(file("d1", "d1")).await;
    // Wait until the holder has taken its send slot
    eventually(|| async { c.holder().queue_state().await.send_slots_in_use == 1 }).await;

    let requester = Arc::clone(c.requester());
    let shutdown = tokio::spawn(async move { requester.request_shutdown(&DataLocation::new("holder")).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!shutdown.is_finished());
    assert!(!c.holder().is_terminated());

    c.holder_store.open_gate();
    assert!(wait(ticket).await.is_ok());

    let acked = tokio::time::timeout(Duration::from_secs(5), shutdown)
        .await
        .expect("shutdown timed out")
        .expect("shutdown task panicked");
    assert!(acked.is_ok());
    assert!(c.holder().is_terminated());
}

#[tokio::test]
async fn test_idle_node_acknowledges_every_shutdown() {
    let c = cluster(ClusterOptions::default());

    c.requester()
        .request_shutdown(&DataLocation::new("holder"))
        .await
        .expect("first shutdown");
    assert!(c.holder().is_terminated());

    // Already terminated: acknowledged at once, terminal action not repeated
    c.requester()
        .request_shutdown(&DataLocation::new("holder"))
        .await
        .expect("second shutdown");
    assert!(c.holder().is_terminated());
}

#[tokio::test]
async fn test_shutdown_unknown_node_fails() {
    let c = cluster(ClusterOptions::default());

    let err = c
        .requester()
        .request_shutdown(&DataLocation::new("nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::ConnectionFault(_)));
}

#[tokio::test]
async fn test_three_nodes_share_one_holder() {
    let c = cluster(ClusterOptions::default());
    c.holder_store.inner.put_file("shared", b"s").await.unwrap();

    let temp = TempDir::new().unwrap();
    let third_store = Arc::new(FsDataStore::new(temp.path()));
    let third = TransferNode::spawn_local(
        &c.network,
        "third",
        CoordinatorConfig::default(),
        Arc::clone(&third_store) as Arc<dyn DataStore>,
    )
    .unwrap();

    let a = c.request(file("shared", "shared")).await;
    let b = third.coordinator().add_transfer_request(file("shared", "mine")).await;

    assert!(wait(a).await.is_ok());
    assert!(wait(b).await.is_ok());
    assert_eq!(third_store.read_file("mine").await.unwrap(), b"s");
    eventually(|| async { c.holder().metrics().demands_served == 2 }).await;
}

#[tokio::test]
async fn test_concurrent_shutdown_requests_terminate_once() {
    let c = cluster(ClusterOptions {
        gated: true,
        ..Default::default()
    });
    let sources = ["s1", "s2", "s3"];
    for name in sources {
        c.holder_store.inner.put_file(name, name.as_bytes()).await.unwrap();
    }

    let mut tickets = Vec::new();
    for name in sources {
        tickets.push(c.request(file(name, name)).await);
    }
    eventually(|| async { c.holder().queue_state().await.send_slots_in_use == 3 }).await;

    // Count every flip of the terminal flag until it goes quiet
    let mut terminated = c.holder().terminated();
    let flips = tokio::spawn(async move {
        let mut flips = 0;
        let mut window = Duration::from_secs(5);
        while let Ok(Ok(())) = tokio::time::timeout(window, terminated.changed()).await {
            flips += 1;
            window = Duration::from_millis(300);
        }
        flips
    });

    let temp = TempDir::new().unwrap();
    let mut peers = Vec::new();
    let mut shutdowns = Vec::new();
    for name in ["r1", "r2", "r3"] {
        let peer = TransferNode::spawn_local(
            &c.network,
            name,
            CoordinatorConfig::default(),
            Arc::new(FsDataStore::new(temp.path().join(name))),
        )
        .unwrap();
        let coordinator = Arc::clone(peer.coordinator());
        shutdowns.push(tokio::spawn(async move {
            coordinator.request_shutdown(&DataLocation::new("holder")).await
        }));
        peers.push(peer);
    }

    eventually(|| async { c.holder().queue_state().await.finishing }).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(shutdowns.iter().all(|s| !s.is_finished()));
    assert!(!c.holder().is_terminated());

    // All three sends finish together and race to complete the drain
    c.holder_store.open_gate();
    for ticket in tickets {
        assert!(wait(ticket).await.is_ok());
    }
    for shutdown in shutdowns {
        let acked = tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("shutdown timed out")
            .expect("shutdown task panicked");
        assert!(acked.is_ok());
    }

    assert!(c.holder().is_terminated());
    assert_eq!(flips.await.unwrap(), 1);
}
