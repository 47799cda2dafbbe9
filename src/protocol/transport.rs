use std::io::{self, Read, Write};

use log::trace;

use crate::error::{Result, RpcError};

use super::{Encoding, Envelope, StreamDecoder, Value, codec};

/// Size of a single socket read.
pub const BUFSIZE: usize = 1024;

/// Exchanges envelopes over a bidirectional byte stream.
///
/// One transport owns one stream and the decoder state for it, so bytes that
/// arrive after the awaited message are kept for the following read.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    encoding: Encoding,
    decoder: StreamDecoder,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T, encoding: Encoding) -> Self {
        Self {
            stream,
            encoding,
            decoder: StreamDecoder::new(encoding),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    /// Bytes read from the stream but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    pub fn encode(&self, envelope: Envelope) -> Result<Vec<u8>> {
        codec::encode(envelope, self.encoding)
    }

    /// Writes an already encoded message, looping over partial writes.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            match self.stream.write(&data[sent..]) {
                Ok(0) => {
                    return Err(RpcError::Connection(
                        "failed to write message: stream closed".into(),
                    ));
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.stream.flush()?;
        trace!("wrote {sent} bytes");
        Ok(())
    }

    pub fn write_message(&mut self, envelope: Envelope) -> Result<()> {
        let data = self.encode(envelope)?;
        self.write_bytes(&data)
    }

    /// Reads until exactly one complete value has been decoded.
    pub fn read_value(&mut self) -> Result<Value> {
        let mut buf = [0u8; BUFSIZE];
        loop {
            if let Some(value) = self.decoder.try_next()? {
                return Ok(value);
            }

            let n = match self.stream.read(&mut buf) {
                Ok(0) => {
                    return Err(RpcError::Connection(
                        "connection closed by remote".into(),
                    ));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.decoder.feed(&buf[..n]);
        }
    }

    pub fn read_message(&mut self) -> Result<Envelope> {
        Envelope::from_value(self.read_value()?)
    }
}
