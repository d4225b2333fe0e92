//! Fleetlink wire protocol — Agent/Center networking over long-lived TCP.
//!
//! ## Architecture
//!
//! - **cipher**: AES-CFB payload encryption with a pre-shared key
//! - **codec**: self-delimiting frames (magic + length prefix + JSON body),
//!   message sealing/opening with HMAC signatures, partial-read reassembly
//! - **session**: one task per connection; serialized writes, dispatch loop
//! - **registry**: thread-safe directory of live sessions keyed by peer id
//!
//! ## Frame layout (version 1.0)
//!
//! ```text
//! +----------------+----------------+------------------+
//! | magic (4B)     | length (4B BE) | body (JSON)      |
//! | AB CD EF 01    | body length    | Message          |
//! +----------------+----------------+------------------+
//! ```
//!
//! The body is a JSON [`Message`](fleetlink_types::Message) whose `data`
//! field is `hex(IV || AES-CFB ciphertext)`.

pub mod cipher;
pub mod codec;
pub mod registry;
pub mod session;

pub use cipher::CipherError;
pub use codec::CodecError;
pub use registry::SessionRegistry;
pub use session::{MessageHandler, Session, WireError};
