//! Cluster membership agent: master connection and heartbeats.
//!
//! Each worker node runs one [`MembershipAgent`]. Once started it owns two
//! long-lived tasks:
//!
//! - the **connect supervisor** dials the master until it succeeds, derives
//!   this node's reachable address, marks the node online, then waits for the
//!   connection's `close` event and starts over
//! - the **heartbeat reporter** waits until a master connection and a local
//!   address both exist, then sends a [`NodeInfo`] every report interval
//!
//! ```text
//!             connect ok                   close event
//! Disconnected ──► Connecting ──────► Online ───────────► Disconnected
//!      │               │  ▲  failed:        │
//!      │               │  └─ sleep, retry   │
//!      └───────────────┴────────────────────┴──► Closing (shutdown, terminal)
//! ```
//!
//! Transport callbacks may fire on any thread. They never touch agent state;
//! they only send their connection generation to the supervisor over a
//! channel, so a reconnect is always a continuation of the single supervisor
//! task and close events from superseded connections are ignored.
//!
//! Heartbeat and close notice failures are logged and dropped.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{JsonCodec, MessageCodec};
use crate::config::ClusterConfig;

use super::directory::{ClusterDirectory, ConnectionEvent, EventCallback};
use super::master::{MasterClient, NodeInfo};

/// A metric source sampled on every heartbeat, returning `(name, value)`.
pub type ReportCollector = Arc<dyn Fn() -> (String, f64) + Send + Sync>;

/// Where the agent is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipPhase {
    /// No master connection.
    Disconnected,
    /// Dialing the master.
    Connecting,
    /// Connected; heartbeats flow.
    Online,
    /// Shut down. Terminal.
    Closing,
}

struct AgentState<C: MessageCodec> {
    local_address: String,
    master: Option<MasterClient<C>>,
    generation: u64,
    collectors: Vec<(String, ReportCollector)>,
    closed: bool,
    phase: MembershipPhase,
}

/// Keeps a worker node registered with the master.
pub struct MembershipAgent<C: MessageCodec = JsonCodec> {
    config: Arc<ClusterConfig>,
    directory: Arc<dyn ClusterDirectory>,
    codec: C,
    state: RwLock<AgentState<C>>,
    cancel: CancellationToken,
    next_generation: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipAgent {
    /// Create an agent using the JSON codec.
    pub fn new(config: Arc<ClusterConfig>, directory: Arc<dyn ClusterDirectory>) -> Self {
        Self::with_codec(config, directory, JsonCodec)
    }
}

impl<C: MessageCodec> MembershipAgent<C> {
    /// Create an agent with a custom wire codec.
    pub fn with_codec(
        config: Arc<ClusterConfig>,
        directory: Arc<dyn ClusterDirectory>,
        codec: C,
    ) -> Self {
        Self {
            config,
            directory,
            codec,
            state: RwLock::new(AgentState {
                local_address: String::new(),
                master: None,
                generation: 0,
                collectors: Vec::new(),
                closed: false,
                phase: MembershipPhase::Disconnected,
            }),
            cancel: CancellationToken::new(),
            next_generation: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Launch the connect supervisor and the heartbeat reporter.
    ///
    /// Calling this more than once, after shutdown, or without a configured
    /// master address does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.is_closed() {
            return;
        }
        if self.config.master_address().is_none() {
            tracing::warn!("no master address configured, membership agent not started");
            return;
        }
        tasks.push(tokio::spawn(Arc::clone(self).supervise()));
        tasks.push(tokio::spawn(Arc::clone(self).report()));
    }

    /// Register a metric source. The `field` label is only used for logging;
    /// the heartbeat key is the name the collector returns.
    pub fn add_report_info<F>(&self, field: impl Into<String>, collector: F)
    where
        F: Fn() -> (String, f64) + Send + Sync + 'static,
    {
        let field = field.into();
        tracing::debug!(field = %field, "adding report collector");
        self.state.write().collectors.push((field, Arc::new(collector)));
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> MembershipPhase {
        self.state.read().phase
    }

    /// The derived `"ip:port"` of this node, empty until the first connection.
    pub fn local_address(&self) -> String {
        self.state.read().local_address.clone()
    }

    /// Whether the agent has been shut down.
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Whether a master connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.state.read().master.is_some()
    }

    /// Stop both tasks and send one close notice to the master.
    ///
    /// The notice is sent after the state lock is released and is bounded by
    /// the configured close notice timeout; its outcome is only logged.
    /// Subsequent calls do nothing.
    pub async fn shutdown(&self) {
        let (master, address) = {
            let mut state = self.state.write();
            if state.closed {
                return;
            }
            state.closed = true;
            state.phase = MembershipPhase::Closing;
            self.directory.set_online(false);
            (state.master.take(), state.local_address.clone())
        };
        self.cancel.cancel();
        tracing::info!(address = %address, "membership agent closing");

        if let Some(master) = master {
            let notice = master.report_node_close(&address);
            match tokio::time::timeout(self.config.close_notice_timeout(), notice).await {
                Ok(Ok(_)) => tracing::debug!("close notice delivered"),
                Ok(Err(err)) => tracing::debug!(error = %err, "close notice failed"),
                Err(_) => tracing::warn!("close notice timed out"),
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "membership task failed");
                }
            }
        }
    }

    async fn supervise(self: Arc<Self>) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<u64>();
        loop {
            let generation = match self.connect_to_master(&events_tx).await {
                Some(generation) => generation,
                None => return,
            };

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    event = events_rx.recv() => match event {
                        Some(closed) if closed == generation => break,
                        Some(stale) => tracing::trace!(stale, "ignoring close of old connection"),
                        None => return,
                    },
                }
            }

            if !self.on_dropped() {
                return;
            }
        }
    }

    async fn connect_to_master(&self, events: &mpsc::UnboundedSender<u64>) -> Option<u64> {
        let master_address = self.config.master_address()?;
        {
            let mut state = self.state.write();
            if state.closed {
                return None;
            }
            state.phase = MembershipPhase::Connecting;
        }
        tracing::info!(master = master_address, "looking for master");

        loop {
            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
            let tx = events.clone();
            let on_event: EventCallback = Arc::new(move |event: ConnectionEvent| {
                if event == ConnectionEvent::Close && tx.send(generation).is_err() {
                    tracing::trace!(generation, "membership supervisor already gone");
                }
            });

            match self.directory.connect_to_node(master_address, on_event).await {
                Ok(client) => {
                    let local_address =
                        derive_local_address(&client.local_addr(), self.config.local_port());
                    let master = MasterClient::new(client, self.codec.clone());
                    if !self.go_online(master, &local_address, generation) {
                        return None;
                    }
                    tracing::info!(
                        master = master_address,
                        local_address = %local_address,
                        "connected to master"
                    );
                    return Some(generation);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "master connect failed, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                    }
                }
            }
        }
    }

    /// Stores a fresh connection. Returns `false` if the agent closed while
    /// dialing.
    fn go_online(&self, master: MasterClient<C>, local_address: &str, generation: u64) -> bool {
        let mut state = self.state.write();
        if state.closed {
            return false;
        }
        state.master = Some(master);
        state.local_address = local_address.to_string();
        state.generation = generation;
        state.phase = MembershipPhase::Online;
        self.directory.set_online(true);
        true
    }

    /// Returns whether the supervisor should reconnect.
    fn on_dropped(&self) -> bool {
        let mut state = self.state.write();
        if state.closed {
            return false;
        }
        state.master = None;
        state.phase = MembershipPhase::Disconnected;
        self.directory.set_online(false);
        tracing::info!(generation = state.generation, "disconnected from master");
        true
    }

    async fn report(self: Arc<Self>) {
        if !self.wait_until_ready().await {
            return;
        }
        tracing::debug!("heartbeat reporter ready");

        loop {
            let (master, info) = match self.snapshot() {
                Some(snapshot) => snapshot,
                None => return,
            };
            if let Some(master) = master {
                if let Err(err) = master.report_node_info(&info).await {
                    tracing::debug!(error = %err, "heartbeat dropped");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.report_interval()) => {}
            }
        }
    }

    /// Polls until a master connection and a local address both exist.
    /// Returns `false` if the agent closed first.
    async fn wait_until_ready(&self) -> bool {
        loop {
            {
                let state = self.state.read();
                if state.closed {
                    return false;
                }
                if state.master.is_some() && !state.local_address.is_empty() {
                    return true;
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.config.ready_poll()) => {}
            }
        }
    }

    fn snapshot(&self) -> Option<(Option<MasterClient<C>>, NodeInfo)> {
        let (master, address, collectors) = {
            let state = self.state.read();
            if state.closed {
                return None;
            }
            let collectors: Vec<ReportCollector> = state
                .collectors
                .iter()
                .map(|(_, collector)| Arc::clone(collector))
                .collect();
            (state.master.clone(), state.local_address.clone(), collectors)
        };

        let metrics = collectors.iter().map(|sample| sample()).collect();
        let info = NodeInfo {
            address,
            role: self.config.role().to_string(),
            app_name: self.config.app_name().to_string(),
            metrics,
        };
        Some((master, info))
    }
}

impl<C: MessageCodec> fmt::Debug for MembershipAgent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MembershipAgent")
            .field("phase", &state.phase)
            .field("local_address", &state.local_address)
            .field("collectors", &state.collectors.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// The IP of the dialed connection's local side combined with the port this
/// node serves on.
fn derive_local_address(socket_addr: &str, port: Option<u16>) -> String {
    let Some(port) = port else {
        return socket_addr.to_string();
    };
    if let Ok(mut addr) = socket_addr.parse::<SocketAddr>() {
        addr.set_port(port);
        return addr.to_string();
    }
    match socket_addr.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => {
            let host = socket_addr
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or(socket_addr);
            format!("{host}:{port}")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cluster::{LocalNetwork, MasterService};

    const MASTER: &str = "10.0.0.1:9000";
    const WORKER: &str = "10.0.0.5:7001";

    fn config() -> Arc<ClusterConfig> {
        Arc::new(
            ClusterConfig::builder()
                .local_address("0.0.0.0:7001")
                .master_address(MASTER)
                .role("room")
                .app_name("lobby")
                .report_interval(Duration::from_millis(200))
                .build()
                .expect("valid config"),
        )
    }

    #[test]
    fn test_derive_local_address() {
        assert_eq!(derive_local_address("10.0.0.5:40001", Some(7001)), "10.0.0.5:7001");
        assert_eq!(derive_local_address("10.0.0.5", Some(7001)), "10.0.0.5:7001");
        assert_eq!(derive_local_address("10.0.0.5:40001", None), "10.0.0.5:40001");
        assert_eq!(derive_local_address("[::1]:40001", Some(7001)), "[::1]:7001");
        assert_eq!(derive_local_address("::1", Some(7001)), "[::1]:7001");
        assert_eq!(derive_local_address("game-host:40001", Some(7001)), "game-host:7001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_reports() {
        let network = LocalNetwork::new();
        let master = Arc::new(MasterService::new());
        network
            .join(MASTER, "master")
            .register(master.clone())
            .expect("register");
        let directory = network.join(WORKER, "room");
        let agent = Arc::new(MembershipAgent::new(config(), directory.clone()));
        agent.add_report_info("load", || ("load".to_string(), 0.25));

        agent.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(agent.phase(), MembershipPhase::Online);
        assert_eq!(agent.local_address(), WORKER);
        assert!(directory.is_online());
        let report = master.node(WORKER).expect("heartbeat received");
        assert_eq!(report.role, "room");
        assert_eq!(report.app_name, "lobby");
        assert_eq!(report.metrics.get("load"), Some(&0.25));

        agent.shutdown().await;
        assert!(master.node(WORKER).is_none());
        assert!(!directory.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_connect_sends_nothing() {
        let network = LocalNetwork::new();
        network.join(MASTER, "master");
        network.set_reachable(MASTER, false);
        let agent = Arc::new(MembershipAgent::new(config(), network.join(WORKER, "room")));

        agent.start();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(agent.phase(), MembershipPhase::Connecting);

        agent.shutdown().await;
        agent.shutdown().await;

        assert!(agent.is_closed());
        assert_eq!(agent.phase(), MembershipPhase::Closing);
        assert_eq!(network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_without_master_is_noop() {
        let network = LocalNetwork::new();
        let config = Arc::new(
            ClusterConfig::builder()
                .local_address("0.0.0.0:9000")
                .build()
                .expect("valid config"),
        );
        let agent = Arc::new(MembershipAgent::new(config, network.join(MASTER, "master")));

        agent.start();

        assert_eq!(agent.phase(), MembershipPhase::Disconnected);
        assert!(agent.tasks.lock().is_empty());
    }
}
