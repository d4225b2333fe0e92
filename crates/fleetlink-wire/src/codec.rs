//! Frame codec — converts between [`Message`] values and wire bytes.
//!
//! A frame is `magic(4) || length(4, u32 BE) || body(length)` where the
//! body is the JSON-serialized message. [`seal`] builds an outbound message
//! (encrypt, checksum, sign); [`open`] verifies and decrypts an inbound one.
//!
//! [`decode_frame`] is incremental: fed a growing buffer it reports
//! [`CodecError::Incomplete`] until a whole frame is present, then returns
//! the message together with the exact number of bytes consumed so the
//! caller can slide its buffer and try again. A buffer holding a partial
//! frame must be retained untouched, never discarded.

use crate::cipher::{self, CipherError};
use chrono::Utc;
use fleetlink_types::message::{Message, MessageType, WIRE_VERSION};
use fleetlink_types::{generate_msg_id, generate_nonce};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Frame start marker.
pub const MAGIC: [u8; 4] = [0xAB, 0xCD, 0xEF, 0x01];
/// Width of the big-endian body-length field.
pub const LEN_BYTES: usize = 4;
/// Magic plus length prefix.
pub const HEADER_LEN: usize = MAGIC.len() + LEN_BYTES;
/// Maximum body size for a single frame (16 MiB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
/// Messages older than this are rejected by [`open`].
pub const MAX_MESSAGE_AGE_SECS: i64 = 300;

/// Errors from the frame codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Not enough bytes for a complete frame. Transient: read more data.
    #[error("incomplete frame")]
    Incomplete,
    /// The buffer does not start with the frame magic.
    #[error("bad magic bytes")]
    BadMagic,
    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge(u32),
    #[error("invalid frame body: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("message expired: {age_secs}s old")]
    Expired { age_secs: i64 },
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("signature mismatch")]
    SignatureMismatch,
}

fn checksum_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

fn sign_fields(
    key: &str,
    msg_id: &str,
    data: &str,
    nonce: &str,
    version: &str,
    checksum: &str,
) -> Result<String, CodecError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| CodecError::Cipher(CipherError::InvalidKeyLength(key.len())))?;
    mac.update(msg_id.as_bytes());
    mac.update(data.as_bytes());
    mac.update(nonce.as_bytes());
    mac.update(version.as_bytes());
    mac.update(checksum.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a signed, encrypted message carrying `plaintext`.
///
/// `msg_id` is reused from the request when building a reply; pass
/// [`generate_msg_id`]`()` for a fresh request. The nonce, timestamp,
/// checksum and signature are always fresh.
pub fn seal(
    msg_id: impl Into<String>,
    kind: MessageType,
    plaintext: &str,
    key: &str,
) -> Result<Message, CodecError> {
    let msg_id = msg_id.into();
    let nonce = generate_nonce();
    let data = cipher::encrypt(plaintext, key)?;
    let checksum = checksum_hex(&data);
    let sign = sign_fields(key, &msg_id, &data, &nonce, WIRE_VERSION, &checksum)?;
    Ok(Message {
        msg_id,
        kind,
        sign,
        data,
        timestamp: Utc::now().timestamp(),
        nonce,
        version: WIRE_VERSION.to_string(),
        checksum,
    })
}

/// [`seal`] with a fresh message id.
pub fn seal_new(kind: MessageType, plaintext: &str, key: &str) -> Result<Message, CodecError> {
    seal(generate_msg_id(), kind, plaintext, key)
}

/// Verify an inbound message and decrypt its payload.
///
/// Checks the freshness window, the checksum, and the HMAC signature
/// (constant-time compare) before touching the cipher.
pub fn open(mut msg: Message, key: &str) -> Result<Message, CodecError> {
    let age_secs = Utc::now().timestamp() - msg.timestamp;
    if age_secs > MAX_MESSAGE_AGE_SECS {
        return Err(CodecError::Expired { age_secs });
    }
    if checksum_hex(&msg.data) != msg.checksum {
        return Err(CodecError::ChecksumMismatch);
    }
    let expected = sign_fields(
        key,
        &msg.msg_id,
        &msg.data,
        &msg.nonce,
        &msg.version,
        &msg.checksum,
    )?;
    let sign_ok: bool =
        subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), msg.sign.as_bytes()).into();
    if !sign_ok {
        return Err(CodecError::SignatureMismatch);
    }
    msg.data = cipher::decrypt(&msg.data, key)?;
    Ok(msg)
}

/// Encode a message as one wire frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() as u64 > MAX_FRAME_SIZE as u64 {
        return Err(CodecError::FrameTooLarge(body.len() as u32));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Total length of the frame at the head of `buf`, when its header is
/// complete and well-formed. Used to skip exactly one malformed frame.
pub fn frame_span(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN || buf[..MAGIC.len()] != MAGIC {
        return None;
    }
    let mut len_bytes = [0u8; LEN_BYTES];
    len_bytes.copy_from_slice(&buf[MAGIC.len()..HEADER_LEN]);
    Some(HEADER_LEN + u32::from_be_bytes(len_bytes) as usize)
}

/// How many leading bytes to drop to realign on a frame boundary after a
/// [`CodecError::BadMagic`]. Keeps a trailing magic prefix in place, since
/// the rest of the marker may still be in flight.
pub fn resync_offset(buf: &[u8]) -> usize {
    if let Some(pos) = buf.windows(MAGIC.len()).skip(1).position(|w| w == MAGIC) {
        return pos + 1;
    }
    for keep in (1..MAGIC.len()).rev() {
        if buf.len() >= keep && buf[buf.len() - keep..] == MAGIC[..keep] {
            return buf.len() - keep;
        }
    }
    buf.len()
}

/// Decode, verify and decrypt the frame at the head of `buf`.
///
/// Returns the message and the exact number of bytes consumed. On
/// [`CodecError::Incomplete`] nothing was consumed and the caller must
/// retain the buffer as-is; on any other error the caller decides how much
/// to skip ([`frame_span`] / [`resync_offset`]).
pub fn decode_frame(buf: &[u8], key: &str) -> Result<(Message, usize), CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Incomplete);
    }
    if buf[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let mut len_bytes = [0u8; LEN_BYTES];
    len_bytes.copy_from_slice(&buf[MAGIC.len()..HEADER_LEN]);
    let body_len = u32::from_be_bytes(len_bytes);
    if body_len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    let total = HEADER_LEN + body_len as usize;
    if buf.len() < total {
        return Err(CodecError::Incomplete);
    }

    let msg: Message = serde_json::from_slice(&buf[HEADER_LEN..total])?;
    let msg = open(msg, key)?;
    Ok((msg, total))
}
