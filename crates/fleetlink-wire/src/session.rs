//! Session — owns one TCP connection's lifecycle.
//!
//! A [`Session`] wraps the write half behind an async mutex so the
//! heartbeat ticker and reply paths never interleave frames. The read half
//! is consumed by [`read_loop`], one task per connection: read with a
//! deadline, reassemble frames, dispatch each decoded message in arrival
//! order on the same task, and on exit remove the session from the
//! registry and close the socket.

use crate::codec::{self, CodecError};
use crate::registry::SessionRegistry;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use fleetlink_types::Message;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, warn};

/// Errors from the session layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("session closed")]
    Closed,
}

/// Read buffer chunk size.
const READ_CHUNK: usize = 4096;

/// Handler for decoded inbound messages.
///
/// Called sequentially from the session's read task; implementations must
/// not block on other sessions.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, session: &Arc<Session>, msg: Message);
}

/// One peer connection. The peer id is the remote socket address, bound
/// for the session's lifetime.
pub struct Session {
    peer_id: String,
    writer: Mutex<OwnedWriteHalf>,
    /// Most recently observed inbound msg_id. Informational only.
    last_msg_id: std::sync::Mutex<Option<String>>,
    closed_tx: watch::Sender<bool>,
}

impl Session {
    /// Wrap the write half of an accepted or dialed connection.
    pub fn new(peer_id: String, writer: OwnedWriteHalf) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            peer_id,
            writer: Mutex::new(writer),
            last_msg_id: std::sync::Mutex::new(None),
            closed_tx,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn last_msg_id(&self) -> Option<String> {
        self.last_msg_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn note_msg_id(&self, msg_id: &str) {
        *self.last_msg_id.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(msg_id.to_string());
    }

    /// Encode and write one message. Writes from concurrent tasks are
    /// serialized by the writer lock.
    pub async fn send(&self, msg: &Message) -> Result<(), WireError> {
        if *self.closed_tx.borrow() {
            return Err(WireError::Closed);
        }
        let bytes = codec::encode(msg)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Signal the read loop to exit; the socket closes once both halves
    /// are dropped.
    pub fn close(&self) {
        // send_replace updates the value even with no live receiver, so
        // is_closed() and the send() guard stay truthful.
        self.closed_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_id", &self.peer_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drain every complete frame out of `buf`, sliding it by the exact bytes
/// consumed. Partial frames stay in place; malformed frames are skipped
/// individually (logged once each) without touching what follows them.
fn drain_frames(buf: &mut BytesMut, key: &str, peer_id: &str) -> Vec<Message> {
    let mut out = Vec::new();
    loop {
        match codec::decode_frame(&buf[..], key) {
            Ok((msg, consumed)) => {
                buf.advance(consumed);
                out.push(msg);
            }
            Err(CodecError::Incomplete) => break,
            Err(CodecError::BadMagic) => {
                let skip = codec::resync_offset(&buf[..]);
                warn!(peer = %peer_id, skip, "bad magic bytes, resynchronizing");
                if skip == 0 {
                    break;
                }
                buf.advance(skip);
            }
            Err(e) => {
                // frame_span trusts the declared length, which may exceed
                // what has actually arrived (an oversized frame is rejected
                // before its body is complete).
                let skip = codec::frame_span(&buf[..]).unwrap_or(buf.len()).min(buf.len());
                warn!(peer = %peer_id, error = %e, skip, "dropping malformed frame");
                buf.advance(skip);
            }
        }
    }
    out
}

/// Run a session's read loop until EOF, error, deadline, or close signal.
///
/// `read_timeout` should be tied to the heartbeat interval; a silent peer
/// past the deadline is treated as dead. On exit the session removes
/// itself from `registry`.
pub async fn read_loop<H: MessageHandler>(
    mut reader: OwnedReadHalf,
    session: Arc<Session>,
    registry: SessionRegistry,
    key: String,
    read_timeout: Duration,
    handler: Arc<H>,
) {
    let peer_id = session.peer_id().to_string();
    let mut closed = session.closed();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            _ = closed.changed() => {
                debug!(peer = %peer_id, "session closed, stopping read loop");
                break;
            }
            read = tokio::time::timeout(read_timeout, reader.read(&mut chunk)) => {
                match read {
                    Err(_) => {
                        warn!(peer = %peer_id, timeout_secs = read_timeout.as_secs(),
                              "read deadline exceeded, peer presumed dead");
                        break;
                    }
                    Ok(Ok(0)) => {
                        debug!(peer = %peer_id, "connection closed by peer");
                        break;
                    }
                    Ok(Ok(n)) => {
                        buf.extend_from_slice(&chunk[..n]);
                        for msg in drain_frames(&mut buf, &key, &peer_id) {
                            session.note_msg_id(&msg.msg_id);
                            handler.on_message(&session, msg).await;
                        }
                    }
                    Ok(Err(e)) => {
                        error!(peer = %peer_id, error = %e, "read error");
                        break;
                    }
                }
            }
        }
    }

    registry.remove(&peer_id);
    session.close();
}
