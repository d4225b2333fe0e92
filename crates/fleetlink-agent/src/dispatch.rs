//! Inbound message dispatch for the agent.
//!
//! Heartbeats are answered only for the bound Center: a session that is
//! not in the registry gets no reply and no registry entry, so a second
//! machine connecting with the right key still cannot impersonate the
//! Center the agent first latched onto.

use std::sync::Arc;

use async_trait::async_trait;
use fleetlink_types::{Message, MessageType, DATA_SEPARATOR, HEARTBEAT_DATA};
use fleetlink_wire::{codec, MessageHandler, Session, SessionRegistry};
use tracing::{debug, info, warn};

use crate::shell::CommandExecutor;

/// Reply payload when a command fails or its output cannot be produced.
const ERROR_REPLY: &str = "error";

pub(crate) struct AgentDispatcher {
    key: String,
    registry: SessionRegistry,
    executor: Arc<dyn CommandExecutor>,
}

impl AgentDispatcher {
    pub(crate) fn new(
        key: String,
        registry: SessionRegistry,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            key,
            registry,
            executor,
        }
    }

    /// Runs a command payload, honoring the multi-command separator.
    /// Each sub-command that fails contributes `"error"` to the joined
    /// result instead of aborting the batch.
    async fn run_payload(&self, payload: &str) -> String {
        if !payload.contains(DATA_SEPARATOR) {
            return match self.executor.execute(payload).await {
                Ok(out) => out,
                Err(e) => {
                    warn!(error = %e, "command failed");
                    ERROR_REPLY.to_string()
                }
            };
        }

        let mut parts = Vec::new();
        for cmd in payload.split(DATA_SEPARATOR) {
            match self.executor.execute(cmd).await {
                Ok(out) => parts.push(out),
                Err(e) => {
                    warn!(command = cmd, error = %e, "command in batch failed");
                    parts.push(ERROR_REPLY.to_string());
                }
            }
        }
        parts.join(DATA_SEPARATOR)
    }

    async fn reply(&self, session: &Arc<Session>, msg: Message) {
        if let Err(e) = session.send(&msg).await {
            warn!(peer = session.peer_id(), error = %e, "reply failed, dropping session");
            self.registry.remove(session.peer_id());
            session.close();
        }
    }
}

#[async_trait]
impl MessageHandler for AgentDispatcher {
    async fn on_message(&self, session: &Arc<Session>, msg: Message) {
        match msg.kind {
            MessageType::Heartbeat => {
                if self.registry.get(session.peer_id()).is_none() {
                    warn!(peer = session.peer_id(), "heartbeat from unknown peer, ignoring");
                    return;
                }
                debug!(peer = session.peer_id(), "heartbeat received");
                match codec::seal_new(MessageType::Heartbeat, HEARTBEAT_DATA, &self.key) {
                    Ok(reply) => self.reply(session, reply).await,
                    Err(e) => warn!(error = %e, "failed to seal heartbeat reply"),
                }
            }
            MessageType::Cmd => {
                info!(peer = session.peer_id(), command = %msg.data, "executing command");
                let result = self.run_payload(&msg.data).await;
                match codec::seal(&msg.msg_id, MessageType::Cmd, &result, &self.key) {
                    Ok(reply) => self.reply(session, reply).await,
                    Err(e) => warn!(error = %e, "failed to seal command reply"),
                }
            }
            MessageType::Action => {
                debug!(peer = session.peer_id(), "action message received, no handler wired");
            }
            MessageType::Unknown(ref tag) => {
                warn!(peer = session.peer_id(), kind = %tag, "unknown message type");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ExecError;

    struct FlakyExecutor;

    #[async_trait]
    impl CommandExecutor for FlakyExecutor {
        async fn execute(&self, command: &str) -> Result<String, ExecError> {
            if command.starts_with("bad") {
                Err(ExecError::Failed {
                    status: 1,
                    output: String::new(),
                })
            } else {
                Ok(format!("ran {command}"))
            }
        }
    }

    fn dispatcher() -> AgentDispatcher {
        AgentDispatcher::new(
            "0123456789abcdef".to_string(),
            SessionRegistry::default(),
            Arc::new(FlakyExecutor),
        )
    }

    #[tokio::test]
    async fn single_command_payload() {
        assert_eq!(dispatcher().run_payload("uptime").await, "ran uptime");
    }

    #[tokio::test]
    async fn batch_joins_results_with_separator() {
        let out = dispatcher().run_payload("a#flk#b").await;
        assert_eq!(out, "ran a#flk#ran b");
    }

    #[tokio::test]
    async fn failed_batch_member_becomes_error_marker() {
        let out = dispatcher().run_payload("a#flk#bad one#flk#c").await;
        assert_eq!(out, "ran a#flk#error#flk#ran c");
    }

    #[tokio::test]
    async fn failed_single_command_becomes_error_marker() {
        assert_eq!(dispatcher().run_payload("bad").await, "error");
    }
}
