//! Cluster Demo - a master and two workers in one process.
//!
//! Starts a master node, a `room` worker hosting a room manager service and
//! a `gate` worker that creates rooms through the service by role. The
//! workers heartbeat to the master; the demo then severs the room worker's
//! master connection once to show it reconnecting, and finally shuts
//! everything down.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example cluster_demo -- --rooms 3
//! RUST_LOG=info,tidepool=trace cargo run --example cluster_demo
//! ```
//!
//! A node can also be configured from a TOML file:
//!
//! ```bash
//! cargo run --example cluster_demo -- --room-config room.toml
//! ```

mod room_manager;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tidepool::{ClusterConfig, LocalNetwork, TidepoolNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MASTER: &str = "127.0.0.1:9000";
const GATE: &str = "127.0.0.1:7001";
const ROOM: &str = "127.0.0.1:7002";

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "cluster_demo")]
#[command(about = "In-process cluster with actor routing and heartbeats", long_about = None)]
struct Args {
    /// Number of rooms the gate asks for
    #[arg(short, long, default_value = "3")]
    rooms: u64,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "500")]
    report_interval_ms: u64,

    /// Optional TOML config for the room worker
    #[arg(long)]
    room_config: Option<std::path::PathBuf>,
}

fn worker_config(
    address: &str,
    role: &str,
    interval: Duration,
) -> Result<ClusterConfig, tidepool::ConfigError> {
    ClusterConfig::builder()
        .local_address(address)
        .master_address(MASTER)
        .role(role)
        .app_name("cluster-demo")
        .report_interval(interval)
        .build()
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tidepool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let interval = Duration::from_millis(args.report_interval_ms);
    let network = LocalNetwork::new();

    let master = TidepoolNode::builder()
        .config(ClusterConfig::builder().local_address(MASTER).role("master").build()?)
        .directory(network.join(MASTER, "master"))
        .start()
        .await?;

    let room_config = match &args.room_config {
        Some(path) => ClusterConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => worker_config(ROOM, "room", interval)?,
    };
    let mut room = TidepoolNode::builder()
        .directory(network.join(room_config.local_address(), room_config.role()))
        .config(room_config)
        .start()
        .await?;
    let mut gate = TidepoolNode::builder()
        .config(worker_config(GATE, "gate", interval)?)
        .directory(network.join(GATE, "gate"))
        .start()
        .await?;

    let manager = room_manager::room_manager();
    room.proxy().register(manager.clone())?;
    room.proxy().register_service(manager, room_manager::SERVICE)?;
    if let Some(agent) = room.agent() {
        let proxy = Arc::clone(room.proxy());
        agent.add_report_info("actors", move || {
            ("actors".to_string(), proxy.actor_count() as f64)
        });
    }

    tokio::time::sleep(interval * 2).await;

    let caller = gate.service_caller(None);
    for owner in 0..args.rooms {
        let reply = caller
            .call("room", room_manager::SERVICE, "NewRoom", vec![json!(owner)])
            .await?;
        let room_id: u64 = reply.get(0)?;
        tracing::info!(owner, room_id, "gate got a room");
    }

    let severed = network.disconnect(room.proxy().node_id(), MASTER);
    tracing::info!(severed, "severed room worker from master");
    tokio::time::sleep(interval * 2).await;

    if let Some(table) = master.master() {
        for node in table.nodes() {
            tracing::info!(
                address = %node.address,
                role = %node.role,
                metrics = ?node.metrics,
                "master sees node"
            );
        }
    }

    gate.shutdown().await;
    room.shutdown().await;
    tracing::info!("demo finished");
    Ok(())
}
