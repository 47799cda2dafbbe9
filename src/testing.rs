//! In-process responder used by the pool tests.
use std::{
    net::{TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    config::ConnectionConfig,
    protocol::{Encoding, Envelope, ProtocolTransport, Value},
};

/// Serves every accepted connection on its own thread.
///
/// Methods:
/// - `sum`: adds integer params
/// - `echo`: returns the params array
/// - `fail`: responds with an error payload
/// - `hangup`: closes the connection without responding
/// - `bye`: responds with nil, then closes the connection
#[derive(Clone)]
pub struct TestServer {
    port: u16,
    accepted: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                thread::spawn(move || serve(stream));
            }
        });

        Self { port, accepted }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port)
            .with_connect_timeout(Duration::from_secs(2))
            .with_io_timeout(Duration::from_secs(5))
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Polls until at least `n` connections were accepted.
    pub fn wait_for_accepted(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.accepted() < n {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

fn serve(stream: TcpStream) {
    let mut transport = ProtocolTransport::new(stream, Encoding::Compact);

    while let Ok(Envelope::Request {
        msgid,
        method,
        params,
    }) = transport.read_message()
    {
        let (error, result) = match method.as_str() {
            "sum" => (None, Value::Int(params.iter().filter_map(Value::as_i64).sum())),
            "echo" => (None, Value::Array(params)),
            "fail" => (Some(Value::from("failed")), Value::Nil),
            "hangup" => return,
            "bye" => {
                let _ = transport.write_message(Envelope::Response {
                    msgid,
                    error: None,
                    result: Value::Nil,
                });
                return;
            }
            other => (Some(Value::from(format!("unknown method {other}"))), Value::Nil),
        };

        let reply = Envelope::Response {
            msgid,
            error,
            result,
        };
        if transport.write_message(reply).is_err() {
            return;
        }
    }
}
