//! Wire message model.
//!
//! A [`Message`] is the JSON body of one wire frame. Only `data` is
//! encrypted; the remaining fields travel in clear because the receiver
//! needs them to verify and decrypt the payload.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Wire format version carried in every message.
pub const WIRE_VERSION: &str = "1.0";

/// Payload carried by a heartbeat message.
pub const HEARTBEAT_DATA: &str = "Heartbeat";

/// Separator for multi-command `Cmd` payloads and their joined results.
pub const DATA_SEPARATOR: &str = "#flk#";

/// Message kind. Unknown wire values are preserved rather than rejected so
/// that an older peer never crashes on a newer message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Keep-alive, answered in kind.
    Heartbeat,
    /// Shell command request or its correlated reply.
    Cmd,
    /// Structured action request (extension point).
    Action,
    /// Any tag this build does not recognize.
    Unknown(String),
}

impl MessageType {
    /// The wire tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Heartbeat => "hb",
            Self::Cmd => "cmd",
            Self::Action => "action",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "hb" => Self::Heartbeat,
            "cmd" => Self::Cmd,
            "action" => Self::Action,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire message. Immutable once constructed.
///
/// A reply reuses the request's `msg_id`; everything else is fresh.
/// `sign` is HMAC-SHA256(key, msg_id + data + nonce + version + checksum)
/// and `checksum` is SHA-256(data), both computed over the encrypted form
/// of `data` by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation token, shared between a request and its reply.
    pub msg_id: String,
    /// Message kind tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// HMAC-SHA256 signature over the message fields.
    #[serde(default)]
    pub sign: String,
    /// Payload — encrypted hex on the wire, plaintext after `open`.
    pub data: String,
    /// Unix seconds at creation; stale messages are rejected.
    pub timestamp: i64,
    /// Fresh random value per message.
    pub nonce: String,
    /// Wire format version.
    pub version: String,
    /// SHA-256 checksum of the encrypted payload.
    #[serde(default)]
    pub checksum: String,
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a short random correlation token.
pub fn generate_msg_id() -> String {
    random_token(8)
}

/// Generate a fresh per-message nonce.
pub fn generate_nonce() -> String {
    random_token(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_roundtrip() {
        for kind in [MessageType::Heartbeat, MessageType::Cmd, MessageType::Action] {
            let tag = String::from(kind.clone());
            assert_eq!(MessageType::from(tag), kind);
        }
    }

    #[test]
    fn test_unknown_type_preserved() {
        let kind = MessageType::from("file".to_string());
        assert_eq!(kind, MessageType::Unknown("file".to_string()));
        assert_eq!(kind.as_str(), "file");
    }

    #[test]
    fn test_message_json_shape() {
        let msg = Message {
            msg_id: "abc12345".to_string(),
            kind: MessageType::Heartbeat,
            sign: String::new(),
            data: "deadbeef".to_string(),
            timestamp: 1_700_000_000,
            nonce: "n".repeat(16),
            version: WIRE_VERSION.to_string(),
            checksum: String::new(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"hb\""));
        assert!(json.contains("\"msg_id\":\"abc12345\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_unknown_type_decodes() {
        let json = r#"{"msg_id":"x","type":"session","data":"","timestamp":0,"nonce":"","version":"1.0"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown("session".to_string()));
    }

    #[test]
    fn test_token_lengths() {
        assert_eq!(generate_msg_id().len(), 8);
        assert_eq!(generate_nonce().len(), 16);
        assert_ne!(generate_msg_id(), generate_msg_id());
    }
}
