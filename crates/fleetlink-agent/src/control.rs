//! Local Unix control socket.
//!
//! Line-oriented: one request line in, one response out, then the
//! connection closes. Spoken by `fleetlink ctl`.
//!
//! Commands:
//! - `status` — liveness plus connected peer count
//! - `stop` — shut the agent down
//! - `config` — render the whole configuration
//! - `config <key>` — render one key
//! - `config <key> <value>` — set one key, persisted for the next restart
//! - `update` — notify the Center that this agent wants an update
//! - `remove` — notify the Center, then shut the agent down

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::Agent;

pub(crate) async fn serve(listener: UnixListener, agent: Arc<Agent>) {
    let mut shutdown = agent.shutdown();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let agent = agent.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle(stream, agent).await {
                                warn!(error = %e, "control connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "control accept failed");
                        continue;
                    }
                }
            }
        }
    }
    debug!("control loop stopped");
}

async fn handle(stream: UnixStream, agent: Arc<Agent>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read_half).read_line(&mut line).await?;
    let response = respond(&line, &agent).await;
    write_half.write_all(response.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.shutdown().await?;
    Ok(())
}

async fn respond(line: &str, agent: &Agent) -> String {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("status") => format!(
            "running (pid {}), {} peer(s) connected",
            std::process::id(),
            agent.registry().len()
        ),
        Some("stop") => {
            agent.stop();
            "stopping".to_string()
        }
        Some("update") => match agent.notify_center("Update").await {
            Ok(()) => "update requested".to_string(),
            Err(e) => format!("error: {e}"),
        },
        Some("remove") => match agent.notify_center("Remove").await {
            Ok(()) => {
                agent.stop();
                "remove requested, stopping".to_string()
            }
            Err(e) => format!("error: {e}"),
        },
        Some("config") => {
            let key = parts.next().unwrap_or("");
            match parts.next() {
                Some(value) => match agent.config().set_key(key, value) {
                    Ok(()) => format!("{key} updated, takes effect on restart"),
                    Err(e) => format!("error: {e}"),
                },
                None => match agent.config().get_key(key) {
                    Ok(v) => v,
                    Err(e) => format!("error: {e}"),
                },
            }
        }
        Some(other) => format!("unknown command: {other}"),
        None => "empty command".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_types::AgentConfigStore;

    fn test_agent(dir: &tempfile::TempDir) -> Arc<Agent> {
        let path = dir.path().join("agent.json");
        std::fs::write(
            &path,
            r#"{"port":0,"secret_key":"0123456789abcdef"}"#,
        )
        .unwrap();
        Agent::new(
            Arc::new(AgentConfigStore::load(&path).unwrap()),
            dir.path().join("agent.sock"),
        )
    }

    #[tokio::test]
    async fn test_status_reports_peer_count() {
        let dir = tempfile::tempdir().unwrap();
        let agent = test_agent(&dir);
        let out = respond("status\n", &agent).await;
        assert!(out.contains("running"));
        assert!(out.contains("0 peer(s)"));
    }

    #[tokio::test]
    async fn test_config_get_and_set() {
        let dir = tempfile::tempdir().unwrap();
        let agent = test_agent(&dir);
        assert_eq!(respond("config port\n", &agent).await, "0");
        assert!(respond("config center_ip 10.1.2.3\n", &agent)
            .await
            .contains("updated"));
        assert_eq!(respond("config center_ip\n", &agent).await, "10.1.2.3");
        assert!(respond("config nope\n", &agent).await.starts_with("error:"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let dir = tempfile::tempdir().unwrap();
        let agent = test_agent(&dir);
        assert!(respond("frobnicate\n", &agent)
            .await
            .starts_with("unknown command"));
    }

    #[tokio::test]
    async fn test_stop_signals_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let agent = test_agent(&dir);
        assert_eq!(respond("stop\n", &agent).await, "stopping");
        assert!(agent.is_stopped());
    }

    #[tokio::test]
    async fn test_update_without_center_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let agent = test_agent(&dir);
        assert!(respond("update\n", &agent).await.starts_with("error:"));
        assert!(!agent.is_stopped());
    }
}
