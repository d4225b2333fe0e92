//! Correlation of outbound commands with their replies.
//!
//! Each command registers a oneshot waiter under its msg_id before the
//! frame is written; the reply path resolves the waiter by the echoed
//! msg_id. Late replies find no waiter and are dropped by the caller.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

#[derive(Default)]
pub(crate) struct PendingReplies {
    waiters: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl PendingReplies {
    pub(crate) fn register(&self, msg_id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(msg_id.to_string(), tx);
        rx
    }

    /// Deliver a reply. Returns false when nobody was waiting, which
    /// means the reply was late or unsolicited.
    pub(crate) fn resolve(&self, msg_id: &str, data: String) -> bool {
        let tx = self
            .waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(msg_id);
        match tx {
            Some(tx) => tx.send(data).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for a command that timed out or failed to send.
    pub(crate) fn forget(&self, msg_id: &str) {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(msg_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let pending = PendingReplies::default();
        let rx = pending.register("abc123");
        assert!(pending.resolve("abc123", "output".to_string()));
        assert_eq!(rx.await.unwrap(), "output");
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_unsolicited_reply_is_reported() {
        let pending = PendingReplies::default();
        assert!(!pending.resolve("nobody", "output".to_string()));
    }

    #[tokio::test]
    async fn test_forget_drops_the_waiter() {
        let pending = PendingReplies::default();
        let rx = pending.register("abc123");
        pending.forget("abc123");
        assert_eq!(pending.len(), 0);
        assert!(rx.await.is_err());
        // A reply arriving after the timeout finds no waiter.
        assert!(!pending.resolve("abc123", "late".to_string()));
    }
}
