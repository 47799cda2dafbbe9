pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;

#[cfg(test)]
mod testing;

pub use config::{AcquireMode, ConnectionConfig, PoolConfig};
pub use connection::Connection;
pub use error::{Result, RpcError};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use protocol::{Encoding, Envelope, Value};
