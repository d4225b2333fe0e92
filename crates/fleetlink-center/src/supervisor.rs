//! Heartbeat supervisor.
//!
//! On every tick, sends a heartbeat to each registered agent. A send
//! failure evicts the agent immediately; a connected-but-silent agent is
//! caught by the session read deadline instead.

use std::time::Duration;

use fleetlink_types::{MessageType, HEARTBEAT_DATA};
use fleetlink_wire::{codec, SessionRegistry};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub(crate) async fn run(
    registry: SessionRegistry,
    key: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for session in registry.snapshot() {
                    let msg = match codec::seal_new(MessageType::Heartbeat, HEARTBEAT_DATA, &key) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "failed to seal heartbeat");
                            continue;
                        }
                    };
                    if let Err(e) = session.send(&msg).await {
                        warn!(agent = session.peer_id(), error = %e,
                              "heartbeat send failed, evicting agent");
                        registry.remove(session.peer_id());
                        session.close();
                    } else {
                        debug!(agent = session.peer_id(), "heartbeat sent");
                    }
                }
            }
        }
    }
    debug!("heartbeat supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_wire::Session;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    const KEY: &str = "0123456789abcdef";

    async fn tcp_session(registry: &SessionRegistry) -> (std::sync::Arc<Session>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let agent_side = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let (_read, write) = stream.into_split();
        let session = Session::new(peer.to_string(), write);
        registry.insert(session.clone());
        (session, agent_side)
    }

    #[tokio::test]
    async fn test_heartbeats_reach_the_agent() {
        let registry = SessionRegistry::new();
        let (_session, mut agent_side) = tcp_session(&registry).await;

        let (tx, rx) = watch::channel(false);
        tokio::spawn(run(
            registry.clone(),
            KEY.to_string(),
            Duration::from_millis(50),
            rx,
        ));

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let msg = loop {
            let n = agent_side.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            match codec::decode_frame(&buf, KEY) {
                Ok((msg, _)) => break msg,
                Err(codec::CodecError::Incomplete) => continue,
                Err(e) => panic!("bad frame: {e}"),
            }
        };
        assert!(matches!(msg.kind, MessageType::Heartbeat));
        assert_eq!(msg.data, HEARTBEAT_DATA);
        let _ = tx.send(true);
    }

    #[tokio::test]
    async fn test_send_failure_evicts_the_agent() {
        let registry = SessionRegistry::new();
        let (session, _agent_side) = tcp_session(&registry).await;
        // A closed session refuses writes, which must evict it.
        session.close();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            registry.clone(),
            KEY.to_string(),
            Duration::from_millis(20),
            rx,
        ));

        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
        let _ = tx.send(true);
        handle.await.unwrap();
    }
}
