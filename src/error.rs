//! Error taxonomy shared by the codec, connections and the pool.
use std::io;

use thiserror::Error;

use crate::protocol::Value;

pub type Result<T> = std::result::Result<T, RpcError>;

/// List of possible errors raised while talking to a remote endpoint.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport failure, use before connect, or a closed pool.
    #[error("connection error: {0}")]
    Connection(String),

    /// Connect or I/O deadline exceeded.
    #[error("connection timeout: {0}")]
    Timeout(String),

    /// Malformed envelope or a response that does not answer the outstanding request.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Application error reported by the remote side, carried verbatim.
    #[error("remote error: {0}")]
    Response(Value),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl RpcError {
    /// Timeouts are a kind of connection failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, RpcError::Connection(_) | RpcError::Timeout(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout(_))
    }
}

impl From<io::Error> for RpcError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => RpcError::Timeout(e.to_string()),
            _ => RpcError::Connection(e.to_string()),
        }
    }
}

impl From<bincode::error::EncodeError> for RpcError {
    fn from(e: bincode::error::EncodeError) -> Self {
        RpcError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for RpcError {
    fn from(e: bincode::error::DecodeError) -> Self {
        RpcError::Protocol(format!("failed to decode message: {e}"))
    }
}
