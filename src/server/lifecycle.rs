//! Startup and shutdown ordering of a standalone node.
//!
//! ```text
//! Stopped -> Loading -> Serving -> Stopping -> Stopped
//! ```
//! `start` replays persisted state before the port is bound, so a client
//! never sees a partially recovered tree. `shutdown` stops accepting work
//! first, then destroys sessions (cleaning their ephemerals and firing the
//! last watches), then closes the transport and flushes storage.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::create_transport;
use crate::metrics;
use crate::open_txn_store;
use crate::KeeperConfig;
use crate::KeeperDatabase;
use crate::LifecycleError;
use crate::RequestProcessor;
use crate::Result;
use crate::ServerStats;
use crate::SessionRegistry;
use crate::StatsProvider;
use crate::Transport;
use crate::WatchManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Loading,
    Serving,
    Stopping,
}

struct Running {
    processor: Arc<RequestProcessor>,
    transport: Arc<dyn Transport>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<()>,
    background: Vec<JoinHandle<()>>,
}

/// A single coordination node. `start` and `shutdown` may be called from
/// any number of tasks; transitions are serialised.
pub struct KeeperServer {
    config: KeeperConfig,
    state: RwLock<ServerState>,
    running: Mutex<Option<Running>>,
    /// Readable without waiting for an in-flight transition
    local_addr: RwLock<Option<SocketAddr>>,
    processor: RwLock<Option<Arc<RequestProcessor>>>,
}

impl std::fmt::Debug for KeeperServer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("KeeperServer")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl KeeperServer {
    /// `config` is expected to be validated already.
    pub fn new(config: KeeperConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ServerState::Stopped),
            running: Mutex::new(None),
            local_addr: RwLock::new(None),
            processor: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    pub fn is_serving(&self) -> bool {
        self.state() == ServerState::Serving
    }

    /// Address clients connect to while serving
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    pub fn stats(&self) -> Option<ServerStats> {
        self.processor.read().as_ref().map(|p| p.stats())
    }

    /// Recovers state, binds the transport and starts the background tasks.
    ///
    /// # Errors
    /// - `AlreadyRunning` unless the server is stopped
    /// - `Fatal` when persisted state can not be replayed; the server stays
    ///   stopped and never binds the port
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut slot = self.running.lock().await;
        if slot.is_some() || self.state() != ServerState::Stopped {
            return Err(LifecycleError::AlreadyRunning.into());
        }

        self.set_state(ServerState::Loading);
        match self.boot() {
            Ok(booted) => {
                let local_addr = booted.local_addr;
                *self.local_addr.write() = Some(local_addr);
                *self.processor.write() = Some(booted.processor.clone());
                *slot = Some(booted);
                self.set_state(ServerState::Serving);
                info!(%local_addr, transport = ?self.config.server.transport, "serving clients");
                Ok(local_addr)
            }
            Err(e) => {
                error!("server failed to start: {}", e);
                self.set_state(ServerState::Stopped);
                Err(e)
            }
        }
    }

    fn boot(&self) -> Result<Running> {
        metrics::init_metrics();

        let store = open_txn_store(&self.config.storage)?;
        let watches = Arc::new(WatchManager::new());
        let sessions = Arc::new(SessionRegistry::new(&self.config.server));
        let db = Arc::new(KeeperDatabase::new(store, watches, self.config.storage.snap_count));
        let summary = db.load()?;

        let processor = Arc::new(RequestProcessor::new(&self.config, db.clone(), sessions));
        processor.restore_sessions(&summary.sessions);
        processor.set_accepting(true);

        let transport = create_transport(self.config.server.transport);
        let local_addr = match transport.start(processor.clone(), self.config.server.listen_address) {
            Ok(local_addr) => local_addr,
            Err(e) => {
                processor.set_accepting(false);
                if let Err(close_error) = db.close() {
                    warn!("closing storage after failed start: {}", close_error);
                }
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let mut background = vec![self.spawn_session_sweeper(processor.clone(), shutdown_rx.clone())];
        if self.config.monitoring.prometheus_enabled {
            let port = self.config.monitoring.prometheus_port;
            let stats_processor = processor.clone();
            let stats: StatsProvider = Arc::new(move || stats_processor.stats());
            background.push(tokio::spawn(async move {
                metrics::start_server(port, stats, shutdown_rx).await;
            }));
        }

        Ok(Running {
            processor,
            transport,
            local_addr,
            shutdown_tx,
            background,
        })
    }

    fn spawn_session_sweeper(
        &self,
        processor: Arc<RequestProcessor>,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> JoinHandle<()> {
        let period = self.config.server.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let expired = processor.expire_sessions();
                        if expired > 0 {
                            debug!(expired, "session sweep");
                        }
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }

    /// Stops the server. A no-op when it is not running.
    pub async fn shutdown(&self) -> Result<()> {
        let mut slot = self.running.lock().await;
        let Some(running) = slot.take() else {
            debug!("shutdown requested on a stopped server");
            return Ok(());
        };

        self.set_state(ServerState::Stopping);
        info!(local_addr = %running.local_addr, "shutting down");

        running.processor.set_accepting(false);
        let closed = running.processor.close_all_sessions();
        debug!(closed, "sessions closed");

        running.transport.shutdown().await;

        if running.shutdown_tx.send(()).is_err() {
            debug!("background tasks already gone");
        }
        for task in running.background {
            if let Err(e) = task.await {
                error!("background task failed: {}", e);
            }
        }

        let closed_storage = running.processor.database().close();
        *self.processor.write() = None;
        *self.local_addr.write() = None;
        self.set_state(ServerState::Stopped);
        info!("server stopped");

        closed_storage
    }

    fn set_state(
        &self,
        state: ServerState,
    ) {
        let mut current = self.state.write();
        debug!(from = ?*current, to = ?state, "server state");
        *current = state;
    }
}
