//! Fleetlink agent daemon.
//!
//! The agent listens for the Center's TCP connection, answers its
//! heartbeats, executes the commands it sends, and serves a local Unix
//! control socket for operator queries.
//!
//! One quirk worth knowing: the first connection the agent accepts is
//! bound as the Center and is the only peer whose heartbeats are
//! honored. Anyone else who connects, key or no key, is read from but
//! never answered and never enters the registry.

pub mod control;
pub mod dispatch;
pub mod shell;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleetlink_types::{AgentConfigStore, ConfigError, MessageType};
use fleetlink_wire::{
    cipher, codec, session, CipherError, CodecError, Session, SessionRegistry, WireError,
};
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatch::AgentDispatcher;
use crate::shell::{CommandExecutor, ShellExecutor};

/// A silent Center is presumed dead after missing two heartbeat windows.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("no center is bound")]
    NoCenter,
}

/// The agent daemon. Construct, [`start`](Agent::start), then either wait
/// on a signal or drive [`stop`](Agent::stop) from the control socket.
pub struct Agent {
    config: Arc<AgentConfigStore>,
    registry: SessionRegistry,
    executor: Arc<dyn CommandExecutor>,
    sock_path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl Agent {
    pub fn new(config: Arc<AgentConfigStore>, sock_path: impl Into<PathBuf>) -> Arc<Self> {
        Self::with_executor(config, sock_path, Arc::new(ShellExecutor))
    }

    /// Substitute the command executor. Used by tests.
    pub fn with_executor(
        config: Arc<AgentConfigStore>,
        sock_path: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            registry: SessionRegistry::new(),
            executor,
            sock_path: sock_path.into(),
            shutdown_tx,
            local_addr: std::sync::Mutex::new(None),
        })
    }

    /// Bind the TCP listener and the control socket, then serve both from
    /// background tasks. A malformed key or a failed bind is fatal.
    pub async fn start(self: &Arc<Self>) -> Result<(), AgentError> {
        let cfg = self.config.get();
        cipher::validate_key(&cfg.secret_key)?;

        let listener = TcpListener::bind(("0.0.0.0", cfg.port)).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr);
        info!(%addr, "agent listening");

        if self.sock_path.exists() {
            // Stale socket from an unclean shutdown.
            let _ = std::fs::remove_file(&self.sock_path);
        }
        let control = UnixListener::bind(&self.sock_path)?;
        info!(sock = %self.sock_path.display(), "control socket ready");

        tokio::spawn(self.clone().accept_loop(listener, cfg.secret_key));
        tokio::spawn(control::serve(control, self.clone()));
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, key: String) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let handler = Arc::new(AgentDispatcher::new(
            key.clone(),
            self.registry.clone(),
            self.executor.clone(),
        ));

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let (read_half, write_half) = stream.into_split();
                    let session = Session::new(peer.to_string(), write_half);

                    // First connection wins the Center slot; it frees up
                    // only when that session dies.
                    if self.registry.is_empty() {
                        info!(peer = %peer, "center bound");
                        self.registry.insert(session.clone());
                    } else {
                        warn!(peer = %peer, "extra connection, not binding as center");
                    }

                    tokio::spawn(session::read_loop(
                        read_half,
                        session,
                        self.registry.clone(),
                        key.clone(),
                        READ_TIMEOUT,
                        handler.clone(),
                    ));
                }
            }
        }
        debug!("accept loop stopped");
    }

    /// Signal shutdown: stop accepting, close every session, remove the
    /// control socket file.
    pub fn stop(&self) {
        // send_replace updates the value even with no live receiver.
        self.shutdown_tx.send_replace(true);
        for session in self.registry.snapshot() {
            session.close();
        }
        let _ = std::fs::remove_file(&self.sock_path);
        info!("agent stopping");
    }

    /// Send a one-off heartbeat with a custom payload to the bound
    /// Center. Drives the control socket's `update` and `remove`
    /// commands.
    pub async fn notify_center(&self, data: &str) -> Result<(), AgentError> {
        let session = self
            .registry
            .snapshot()
            .into_iter()
            .next()
            .ok_or(AgentError::NoCenter)?;
        let key = self.config.get().secret_key;
        let msg = codec::seal_new(MessageType::Heartbeat, data, &key)?;
        session.send(&msg).await?;
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Resolve once shutdown has been signaled, whether by
    /// [`stop`](Agent::stop) or the control socket.
    pub async fn stopped(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// The bound TCP address, available after [`start`](Agent::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AgentConfigStore {
        &self.config
    }

    pub(crate) fn shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
