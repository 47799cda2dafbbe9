//! A single blocking RPC connection.
//!
//! A [`Connection`] owns at most one TCP stream to a fixed endpoint and performs
//! strictly sequential calls over it: every [`Connection::call`] writes one request
//! and blocks until the matching response has been read. Requests are correlated
//! with responses by a per-connection `msgid` that starts at 1 and keeps counting
//! across reconnects.
//!
//! Any transport failure in the middle of a call closes the stream, since the
//! position in the byte stream can no longer be trusted. The same applies to a
//! response that is malformed or answers a different msgid.
//!
//! # Example
//! ```rust,no_run
//! use tether::{Connection, ConnectionConfig, Value};
//!
//! let mut conn = Connection::new(ConnectionConfig::new("127.0.0.1", 18800)).unwrap();
//! conn.connect().unwrap();
//!
//! let sum = conn.call("sum", vec![Value::from(1), Value::from(2)]).unwrap();
//! println!("{sum}");
//! conn.close();
//! ```
use std::{
    io,
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
};

use log::{debug, trace, warn};

use crate::{
    config::ConnectionConfig,
    error::{Result, RpcError},
    protocol::{Envelope, ProtocolTransport, Value},
};

pub struct Connection {
    config: ConnectionConfig,
    transport: Option<ProtocolTransport<TcpStream>>,
    next_msgid: u64,
}

impl Connection {
    /// Creates a disconnected connection.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport: None,
            next_msgid: 0,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The msgid of the most recent request, 0 before the first call.
    pub fn last_msgid(&self) -> u64 {
        self.next_msgid
    }

    /// Opens the stream and applies the I/O timeout to it.
    pub fn connect(&mut self) -> Result<&mut Self> {
        if self.is_connected() {
            return Err(RpcError::Connection("Already connected".into()));
        }

        let stream = dial(&self.config)?;
        stream.set_read_timeout(self.config.io_timeout)?;
        stream.set_write_timeout(self.config.io_timeout)?;
        stream.set_nodelay(true)?;

        debug!("connected to {}", self.config.endpoint());
        self.transport = Some(ProtocolTransport::new(stream, self.config.encoding));
        Ok(self)
    }

    /// Drops the stream. Errors while shutting it down are ignored.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.get_ref().shutdown(Shutdown::Both) {
                trace!("shutdown of {} failed: {e}", self.config.endpoint());
            }
            debug!("closed connection to {}", self.config.endpoint());
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Local address of the open stream.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport
            .as_ref()
            .and_then(|t| t.get_ref().local_addr().ok())
    }

    /// Checks without blocking that the remote has not hung up.
    ///
    /// Data waiting on an idle connection is treated as dead too: a response that
    /// nobody asked for would be read as the answer to the next call.
    pub fn is_alive(&self) -> bool {
        let Some(transport) = &self.transport else {
            return false;
        };
        if transport.buffered() > 0 {
            return false;
        }

        let stream = transport.get_ref();
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut byte = [0u8; 1];
        let alive = match stream.peek(&mut byte) {
            Ok(_) => false,
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        };
        stream.set_nonblocking(false).is_ok() && alive
    }

    /// Calls `method` on the remote and blocks until its response arrives.
    ///
    /// # Errors
    /// - [`RpcError::Connection`] if not connected, or the transport fails.
    /// - [`RpcError::Timeout`] if the write or read deadline expires.
    /// - [`RpcError::Serialization`] if the request cannot be encoded; the
    ///   connection stays open as nothing was written.
    /// - [`RpcError::Protocol`] for a malformed response or a msgid mismatch.
    /// - [`RpcError::Response`] carrying the remote error payload.
    pub fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Value> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(RpcError::Connection("Not connected".into()));
        };
        self.next_msgid += 1;
        let msgid = self.next_msgid;

        let data = transport.encode(Envelope::request(msgid, method, params))?;
        trace!("call {method} msgid={msgid} ({} bytes)", data.len());

        let exchanged = transport
            .write_bytes(&data)
            .and_then(|()| transport.read_value());
        let value = match exchanged {
            Ok(value) => value,
            Err(e) => return Err(self.abort(e)),
        };

        let (received, error, result) = match Envelope::from_value(value) {
            Ok(Envelope::Response {
                msgid,
                error,
                result,
            }) => (msgid, error, result),
            Ok(other) => {
                return Err(self.abort(RpcError::Protocol(format!(
                    "invalid response: expected a response envelope, received {other:?}"
                ))));
            }
            Err(e) => return Err(self.abort(e)),
        };

        if received != msgid {
            return Err(self.abort(RpcError::Protocol(format!(
                "msgid mismatch: sent {msgid}, received {received}"
            ))));
        }

        match error {
            Some(error) => Err(RpcError::Response(error)),
            None => Ok(result),
        }
    }

    /// Fire-and-forget calls are not supported.
    pub fn notify(&mut self, _method: &str, _params: Vec<Value>) -> Result<()> {
        Err(RpcError::Unsupported("notifications"))
    }

    /// Closes the desynchronized stream and hands back the error that caused it.
    fn abort(&mut self, e: RpcError) -> RpcError {
        warn!("call to {} failed, closing: {e}", self.config.endpoint());
        self.close();
        e
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.config.endpoint())
            .field("connected", &self.is_connected())
            .field("last_msgid", &self.next_msgid)
            .finish()
    }
}

fn dial(config: &ConnectionConfig) -> Result<TcpStream> {
    let addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| {
            RpcError::Connection(format!("failed to resolve {}: {e}", config.endpoint()))
        })?;

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                trace!("connect to {addr} failed: {e}");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => e.into(),
        None => RpcError::Connection(format!(
            "{} did not resolve to any address",
            config.endpoint()
        )),
    })
}
