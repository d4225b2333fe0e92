//! Shared types for the Fleetlink system.
//!
//! - [`Message`]: the unit of communication between Agent and Center
//! - [`AgentConfig`] / [`CenterConfig`]: JSON configuration files
//! - [`ConfigError`]: configuration failures

pub mod config;
pub mod message;

pub use config::{AgentConfig, AgentConfigStore, CenterConfig, ConfigError};
pub use message::{
    generate_msg_id, generate_nonce, Message, MessageType, DATA_SEPARATOR, HEARTBEAT_DATA,
    WIRE_VERSION,
};
