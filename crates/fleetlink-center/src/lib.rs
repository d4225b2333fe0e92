//! Fleetlink center daemon.
//!
//! The Center dials every configured agent, keeps the connections alive
//! with periodic heartbeats, and runs commands on agents with replies
//! correlated by msg_id. Lost connections are redialed with a fixed
//! backoff until shutdown.

mod pending;
mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use fleetlink_types::{CenterConfig, Message, MessageType};
use fleetlink_wire::{
    cipher, codec, session, CipherError, CodecError, MessageHandler, Session, SessionRegistry,
    WireError,
};
use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::pending::PendingReplies;

/// How long a command waits for its reply unless the caller overrides it.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between redial attempts for a lost or unreachable agent.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CenterError {
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("no such agent: {0}")]
    UnknownAgent(String),
    #[error("agent did not reply within {0:?}")]
    Timeout(Duration),
}

/// Routes inbound messages from agents: command replies resolve their
/// waiter, heartbeat replies are liveness-only.
struct CenterHandler {
    pending: Arc<PendingReplies>,
}

#[async_trait]
impl MessageHandler for CenterHandler {
    async fn on_message(&self, session: &Arc<Session>, msg: Message) {
        match msg.kind {
            MessageType::Cmd => {
                if !self.pending.resolve(&msg.msg_id, msg.data) {
                    debug!(agent = session.peer_id(), msg_id = %msg.msg_id,
                           "late or unsolicited command reply dropped");
                }
            }
            MessageType::Heartbeat => {
                // "Heartbeat" is the liveness reply; "Update"/"Remove" are
                // agent-initiated notices.
                debug!(agent = session.peer_id(), data = %msg.data, "heartbeat from agent");
            }
            MessageType::Action => {
                debug!(agent = session.peer_id(), "action message ignored");
            }
            MessageType::Unknown(ref tag) => {
                warn!(agent = session.peer_id(), kind = %tag, "unknown message type");
            }
        }
    }
}

/// The center daemon. Construct from a [`CenterConfig`], then
/// [`start`](Center::start).
pub struct Center {
    config: CenterConfig,
    registry: SessionRegistry,
    pending: Arc<PendingReplies>,
    shutdown_tx: watch::Sender<bool>,
}

impl Center {
    pub fn new(config: CenterConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            registry: SessionRegistry::new(),
            pending: Arc::new(PendingReplies::default()),
            shutdown_tx,
        })
    }

    /// Validate the key, then spawn the heartbeat supervisor and one dial
    /// loop per configured agent.
    pub fn start(self: &Arc<Self>) -> Result<(), CenterError> {
        cipher::validate_key(&self.config.secret_key)?;

        let interval = Duration::from_secs(self.config.heartbeat_secs.max(1));
        tokio::spawn(supervisor::run(
            self.registry.clone(),
            self.config.secret_key.clone(),
            interval,
            self.shutdown_tx.subscribe(),
        ));

        for host in self.config.hosts.clone() {
            tokio::spawn(self.clone().dial_loop(host, interval * 2));
        }
        info!(agents = self.config.hosts.len(), "center started");
        Ok(())
    }

    /// Dial one agent and keep it dialed. Each established connection is
    /// served until it drops, then redialed after [`RECONNECT_DELAY`].
    async fn dial_loop(self: Arc<Self>, host: String, read_timeout: Duration) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let handler = Arc::new(CenterHandler {
            pending: self.pending.clone(),
        });

        loop {
            if *shutdown.borrow() {
                break;
            }
            match TcpStream::connect(&host).await {
                Ok(stream) => {
                    info!(agent = %host, "connected");
                    let (read_half, write_half) = stream.into_split();
                    // Peer id is the configured endpoint, so callers can
                    // address agents by the name they configured.
                    let session = Session::new(host.clone(), write_half);
                    self.registry.insert(session.clone());
                    session::read_loop(
                        read_half,
                        session,
                        self.registry.clone(),
                        self.config.secret_key.clone(),
                        read_timeout,
                        handler.clone(),
                    )
                    .await;
                    warn!(agent = %host, "connection lost");
                }
                Err(e) => {
                    warn!(agent = %host, error = %e, "dial failed");
                }
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        debug!(agent = %host, "dial loop stopped");
    }

    /// Run a command on an agent and wait for its reply.
    ///
    /// The waiter is registered before the frame is written, so a reply
    /// can never race past it. On timeout the waiter is dropped; a reply
    /// arriving later is logged and discarded.
    pub async fn run_command(
        &self,
        peer_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, CenterError> {
        let session = self
            .registry
            .get(peer_id)
            .ok_or_else(|| CenterError::UnknownAgent(peer_id.to_string()))?;
        let msg = codec::seal_new(MessageType::Cmd, command, &self.config.secret_key)?;
        let rx = self.pending.register(&msg.msg_id);

        if let Err(e) = session.send(&msg).await {
            // A write error is as fatal to the session as a read error.
            self.pending.forget(&msg.msg_id);
            self.registry.remove(session.peer_id());
            session.close();
            return Err(e.into());
        }

        let timeout = timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => Ok(data),
            // A dropped sender means the reply can no longer arrive.
            Ok(Err(_)) => Err(CenterError::Timeout(timeout)),
            Err(_) => {
                self.pending.forget(&msg.msg_id);
                Err(CenterError::Timeout(timeout))
            }
        }
    }

    /// Run a command on every connected agent concurrently. Returns one
    /// entry per agent, sorted by peer id; per-agent failures do not
    /// abort the rest.
    pub async fn broadcast(
        self: &Arc<Self>,
        command: &str,
        timeout: Option<Duration>,
    ) -> Vec<(String, Result<String, CenterError>)> {
        let mut tasks = tokio::task::JoinSet::new();
        for peer in self.agents() {
            let center = self.clone();
            let command = command.to_string();
            tasks.spawn(async move {
                let result = center.run_command(&peer, &command, timeout).await;
                (peer, result)
            });
        }
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(entry) = joined {
                results.push(entry);
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Peer ids of currently connected agents.
    pub fn agents(&self) -> Vec<String> {
        self.registry.peer_ids()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Signal shutdown: stop redialing, stop the supervisor, close every
    /// session.
    pub fn stop(&self) {
        // send_replace updates the value even with no live receiver.
        self.shutdown_tx.send_replace(true);
        for session in self.registry.snapshot() {
            self.registry.remove(session.peer_id());
            session.close();
        }
        info!("center stopping");
    }
}
