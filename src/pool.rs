//! Bounded pool of [`Connection`]s shared between threads.
//!
//! The pool owns up to `max_size` connections to one endpoint. Callers borrow a
//! connection with [`ConnectionPool::acquire`] and give it back by dropping the
//! returned [`PooledConnection`] (or passing it to [`ConnectionPool::release`]).
//!
//! # Acquisition
//!
//! 1. While fewer than `max_size` connections are open, a new one is opened.
//! 2. Otherwise the most recently released idle connection is reused, after a
//!    liveness probe; a dead one is replaced by a fresh connection.
//! 3. Otherwise, in [`AcquireMode::Expanding`] an overflow connection is opened
//!    above the cap and destroyed on release. In [`AcquireMode::Blocking`] the
//!    caller waits until a connection is released or the pool is closed.
//!
//! Connections are opened outside the pool lock, with up to `retries` attempts
//! spaced `retry_delay` apart. A capacity slot is reserved before opening, so the
//! cap holds even while several callers connect at once.
//!
//! # Example
//! ```rust,no_run
//! use tether::{ConnectionConfig, ConnectionPool, PoolConfig, Value};
//!
//! let pool = ConnectionPool::new(
//!     PoolConfig::new(ConnectionConfig::new("127.0.0.1", 18800)).with_max_size(4),
//! )
//! .unwrap();
//!
//! let total = pool
//!     .with_connection(|conn| conn.call("sum", vec![Value::from(1), Value::from(2)]))
//!     .unwrap();
//! println!("{total}");
//! pool.close();
//! ```
use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
};

use log::{debug, info, warn};

use crate::{
    config::{AcquireMode, PoolConfig},
    connection::Connection,
    error::{Result, RpcError},
    protocol::Value,
};

/// Point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections counted against the cap, idle or checked out.
    pub open: usize,
    pub idle: usize,
    pub max_size: usize,
    pub closed: bool,
}

#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

struct Shared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

struct PoolState {
    /// Ready connections, most recently released last.
    idle: Vec<Connection>,
    /// Open connections under the cap, including reserved slots being connected.
    open: usize,
    closed: bool,
}

impl ConnectionPool {
    /// Creates the pool. Unless `lazy` is set, `max_size` connections are opened
    /// up front; if any of them cannot be established the ones already opened are
    /// closed and the error is returned.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let lazy = config.lazy;

        let pool = Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        };

        if !lazy {
            pool.fill()?;
        }

        info!(
            "pool for {} ready (max_size={}, lazy={lazy})",
            pool.shared.config.connection.endpoint(),
            pool.shared.config.max_size
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            open: state.open,
            idle: state.idle.len(),
            max_size: self.shared.config.max_size,
            closed: state.closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Checks out a live connection.
    ///
    /// # Errors
    /// - [`RpcError::Connection`] if the pool is closed, including while waiting.
    /// - The last connect error once all retries for a new connection are spent.
    pub fn acquire(&self) -> Result<PooledConnection> {
        let shared = &self.shared;
        let mut state = shared.lock();

        loop {
            if state.closed {
                return Err(pool_closed());
            }

            if state.open < shared.config.max_size {
                state.open += 1;
                drop(state);
                let conn = shared.open_reserved()?;
                return Ok(self.wrap(conn, false));
            }

            if let Some(conn) = state.idle.pop() {
                drop(state);
                if conn.is_alive() {
                    return Ok(self.wrap(conn, false));
                }
                debug!("discarding dead idle connection {conn:?}");
                drop(conn);
                // The dead connection's slot is still reserved for its replacement.
                let conn = shared.open_reserved()?;
                return Ok(self.wrap(conn, false));
            }

            match shared.config.mode {
                AcquireMode::Expanding => {
                    drop(state);
                    debug!("pool saturated, opening overflow connection");
                    let conn = shared.open_with_retry()?;
                    return Ok(self.wrap(conn, true));
                }
                AcquireMode::Blocking => {
                    state = shared
                        .available
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Returns a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Runs `f` on a pooled connection. The connection is released however `f`
    /// exits, including by panic.
    pub fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = self.acquire()?;
        f(&mut conn)
    }

    /// Calls `method` on any pooled connection.
    pub fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.with_connection(|conn| conn.call(method, params))
    }

    /// Destroys idle connections and rejects further acquisition. Callers blocked
    /// in [`acquire`](Self::acquire) fail; connections still checked out are
    /// destroyed when released.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }

        let idle = std::mem::take(&mut state.idle);
        state.open -= idle.len();
        state.closed = true;
        drop(idle);

        self.shared.available.notify_all();
        info!(
            "pool for {} closed, {} connections still checked out",
            self.shared.config.connection.endpoint(),
            state.open
        );
    }

    fn fill(&self) -> Result<()> {
        for _ in 0..self.shared.config.max_size {
            match self.shared.open_with_retry() {
                Ok(conn) => {
                    let mut state = self.shared.lock();
                    state.open += 1;
                    state.idle.push(conn);
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn wrap(&self, conn: Connection, overflow: bool) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            overflow,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.shared.config.connection.endpoint())
            .field("status", &self.status())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_with_retry(&self) -> Result<Connection> {
        let mut conn = Connection::new(self.config.connection.clone())?;
        let mut attempt = 1;

        loop {
            match conn.connect().map(|_| ()) {
                Ok(()) => return Ok(conn),
                Err(e) if e.is_connection_error() && attempt < self.config.retries => {
                    warn!(
                        "connect to {} failed (attempt {attempt}/{}): {e}",
                        self.config.connection.endpoint(),
                        self.config.retries
                    );
                    attempt += 1;
                    thread::sleep(self.config.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Opens a connection for a slot already counted in `open`, giving the slot
    /// back on failure.
    fn open_reserved(&self) -> Result<Connection> {
        self.open_with_retry().inspect_err(|_| {
            let mut state = self.lock();
            state.open -= 1;
            self.available.notify_one();
        })
    }

    fn release(&self, conn: Connection, overflow: bool) {
        if overflow {
            debug!("destroying overflow connection {conn:?}");
            return;
        }

        let mut state = self.lock();
        if state.closed {
            state.open = state.open.saturating_sub(1);
            return;
        }

        if !conn.is_connected() {
            debug!("released connection is closed, freeing its slot");
            state.open = state.open.saturating_sub(1);
            self.available.notify_one();
            return;
        }

        if state.idle.len() < state.open {
            state.idle.push(conn);
            self.available.notify_one();
        } else {
            warn!("pool already holds {} idle connections, destroying surplus", state.idle.len());
        }
    }
}

/// A connection checked out of a [`ConnectionPool`]; released on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    overflow: bool,
    shared: Arc<Shared>,
}

impl PooledConnection {
    /// Whether this connection was opened above the pool's cap.
    pub fn is_overflow(&self) -> bool {
        self.overflow
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.overflow);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("overflow", &self.overflow)
            .finish()
    }
}

fn pool_closed() -> RpcError {
    RpcError::Connection("pool is closed".into())
}
