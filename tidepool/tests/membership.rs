//! Membership agent lifecycle against an in-process master.
//!
//! All tests run on a paused clock so that reconnect delays, readiness
//! polling and heartbeat intervals advance deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tidepool::cluster::{ClusterDirectory, LocalDirectory, MembershipPhase};
use tidepool::{ClusterConfig, JsonCodec, LocalNetwork, MasterService, MembershipAgent};

const MASTER: &str = "10.0.0.1:9000";
const WORKER: &str = "10.0.0.5:7001";

const REPORT: &str = MasterService::<JsonCodec>::REPORT_NODE_INFO;
const CLOSE: &str = MasterService::<JsonCodec>::REPORT_NODE_CLOSE;

struct Cluster {
    network: Arc<LocalNetwork>,
    master: Arc<MasterService>,
    directory: Arc<LocalDirectory>,
    agent: Arc<MembershipAgent>,
}

fn cluster() -> Cluster {
    let network = LocalNetwork::new();
    let master = Arc::new(MasterService::new());
    network
        .join(MASTER, "master")
        .register(master.clone())
        .expect("register master");
    let directory = network.join(WORKER, "room");
    let config = ClusterConfig::builder()
        .local_address("0.0.0.0:7001")
        .master_address(MASTER)
        .role("room")
        .app_name("lobby")
        .report_interval(Duration::from_millis(200))
        .build()
        .expect("valid config");
    let agent = Arc::new(MembershipAgent::new(Arc::new(config), directory.clone()));
    Cluster {
        network,
        master,
        directory,
        agent,
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_heartbeat_before_connection() {
    let c = cluster();
    c.network.set_reachable(MASTER, false);
    c.agent.add_report_info("load", || ("load".to_string(), 0.5));
    c.agent.add_report_info("players", || ("players".to_string(), 12.0));

    c.agent.start();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(c.agent.phase(), MembershipPhase::Connecting);
    assert!(!c.agent.is_connected());
    assert_eq!(c.agent.local_address(), "");
    assert!(!c.directory.is_online());
    assert_eq!(c.network.call_count(REPORT), 0);

    c.network.set_reachable(MASTER, true);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(c.agent.phase(), MembershipPhase::Online);
    assert!(c.directory.is_online());
    let report = c.master.node(WORKER).expect("first heartbeat");
    assert_eq!(report.metrics.len(), 2);
    assert_eq!(report.metrics.get("load"), Some(&0.5));
    assert_eq!(report.metrics.get("players"), Some(&12.0));

    c.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_collectors_are_sampled_every_tick() {
    let c = cluster();
    let ticks = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&ticks);
    c.agent.add_report_info("ticks", move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        ("ticks".to_string(), n as f64)
    });
    // same reported name: the later collector wins
    c.agent.add_report_info("ticks-override", || ("ticks".to_string(), -1.0));

    c.agent.start();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let report = c.master.node(WORKER).expect("heartbeat");
    assert_eq!(report.metrics.len(), 1);
    assert_eq!(report.metrics.get("ticks"), Some(&-1.0));
    assert!(ticks.load(Ordering::SeqCst) >= 2);
    assert_eq!(c.master.report_count(), ticks.load(Ordering::SeqCst));

    c.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_event_reconnects_once_without_gap_heartbeats() {
    let c = cluster();
    c.agent.start();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(c.agent.phase(), MembershipPhase::Online);
    assert_eq!(c.network.connection_count(), 1);

    c.network.set_reachable(MASTER, false);
    assert_eq!(c.network.disconnect(WORKER, MASTER), 1);
    let delivered = c.master.report_count();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(c.agent.phase(), MembershipPhase::Connecting);
    assert!(!c.agent.is_connected());
    assert!(!c.directory.is_online());
    assert_eq!(c.master.report_count(), delivered);
    // the last known address survives the drop
    assert_eq!(c.agent.local_address(), WORKER);

    c.network.set_reachable(MASTER, true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(c.agent.phase(), MembershipPhase::Online);
    assert!(c.directory.is_online());
    assert_eq!(c.network.connection_count(), 1);
    assert!(c.master.report_count() > delivered);

    c.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_drops_keep_a_single_connection() {
    let c = cluster();
    c.agent.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    for _ in 0..5 {
        assert_eq!(c.network.disconnect(WORKER, MASTER), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(c.agent.phase(), MembershipPhase::Online);
        assert_eq!(c.network.connection_count(), 1);
    }

    c.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_teardown_sends_one_close_notice() {
    let c = cluster();
    c.agent.start();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(c.master.node(WORKER).is_some());

    c.agent.shutdown().await;
    let reports = c.network.call_count(REPORT);

    assert!(c.agent.is_closed());
    assert_eq!(c.agent.phase(), MembershipPhase::Closing);
    assert!(!c.directory.is_online());
    assert_eq!(c.network.call_count(CLOSE), 1);
    assert!(c.master.node(WORKER).is_none());

    tokio::time::sleep(Duration::from_secs(2)).await;
    c.agent.shutdown().await;
    c.agent.start();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(c.network.call_count(REPORT), reports);
    assert_eq!(c.network.call_count(CLOSE), 1);
    assert_eq!(c.network.connection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_swallowed() {
    // a master node that publishes nothing: every call fails
    let network = LocalNetwork::new();
    network.join(MASTER, "master");
    let directory = network.join(WORKER, "room");
    let config = ClusterConfig::builder()
        .local_address("0.0.0.0:7001")
        .master_address(MASTER)
        .report_interval(Duration::from_millis(200))
        .build()
        .expect("valid config");
    let agent = Arc::new(MembershipAgent::new(Arc::new(config), directory));

    agent.start();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(agent.phase(), MembershipPhase::Online);
    assert!(network.call_count(REPORT) >= 4);

    agent.shutdown().await;
    assert_eq!(network.call_count(CLOSE), 1);
}
