//! Connection and pool settings.
//!
//! Both structs are plain data with builder-style setters. They are checked once
//! when a [`Connection`](crate::Connection) or [`ConnectionPool`](crate::ConnectionPool)
//! is created and are immutable afterwards.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use tether::{AcquireMode, ConnectionConfig, PoolConfig};
//!
//! let config = PoolConfig::new(
//!     ConnectionConfig::new("127.0.0.1", 18800)
//!         .with_connect_timeout(Duration::from_secs(1))
//!         .with_io_timeout(Duration::from_secs(5)),
//! )
//! .with_max_size(4)
//! .with_mode(AcquireMode::Expanding);
//!
//! assert!(config.validate().is_ok());
//! ```
use std::time::Duration;

use crate::{
    error::{Result, RpcError},
    protocol::Encoding,
};

pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Where and how a single connection talks to its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for establishing the socket; `None` waits on the OS.
    pub connect_timeout: Option<Duration>,
    /// Read and write deadline for every I/O operation; `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    /// Integer layout of the binary wire format, shared with the peer. This is
    /// not a text encoding: strings always travel as UTF-8.
    pub encoding: Encoding,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: None,
            io_timeout: None,
            encoding: Encoding::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// `host:port`, for logs and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RpcError::Config("host must not be empty".into()));
        }
        // The OS rejects zero socket timeouts.
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(RpcError::Config("connect timeout must be non-zero".into()));
        }
        if self.io_timeout == Some(Duration::ZERO) {
            return Err(RpcError::Config("io timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// What `acquire` does when every connection under the cap is checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquireMode {
    /// Wait until another caller releases a connection.
    #[default]
    Blocking,
    /// Open a temporary connection above the cap; it is destroyed on release.
    Expanding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub connection: ConnectionConfig,
    pub max_size: usize,
    /// Open connections on demand instead of filling the pool at construction.
    pub lazy: bool,
    pub mode: AcquireMode,
    /// Connect attempts per connection before giving up.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl PoolConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            max_size: DEFAULT_POOL_SIZE,
            lazy: true,
            mode: AcquireMode::default(),
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_mode(mut self, mode: AcquireMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retries(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        if self.max_size == 0 {
            return Err(RpcError::Config("pool size must be at least 1".into()));
        }
        if self.retries == 0 {
            return Err(RpcError::Config("retries must be at least 1".into()));
        }
        Ok(())
    }
}
