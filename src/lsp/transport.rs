//! Byte-stream transport to an external language server.
//!
//! A transport is either a pair of already-connected streams (child stdio
//! pipes, or an in-memory duplex in tests) or a bound TCP listener waiting for
//! a TCP-mode server to dial back.

use std::io;
use std::net::SocketAddr;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use super::codec::{self, CodecError};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An unopened transport.
pub enum Transport {
    Streams {
        reader: BoxedReader,
        writer: BoxedWriter,
    },
    Tcp(TcpListener),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Streams { .. } => f.write_str("Transport::Streams"),
            Transport::Tcp(listener) => f
                .debug_tuple("Transport::Tcp")
                .field(&listener.local_addr().ok())
                .finish(),
        }
    }
}

impl Transport {
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Transport::Streams {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Bind an ephemeral loopback port for a TCP-mode server.
    pub async fn bind_loopback() -> io::Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        Ok((Transport::Tcp(listener), addr))
    }

    /// Whether opening requires the server to connect back first.
    pub fn needs_accept(&self) -> bool {
        matches!(self, Transport::Tcp(_))
    }

    /// Open the transport, accepting exactly one connection in TCP mode.
    pub async fn open(self) -> io::Result<(TransportReader, TransportWriter)> {
        match self {
            Transport::Streams { reader, writer } => {
                Ok((TransportReader::new(reader), TransportWriter::new(writer)))
            }
            Transport::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                log::debug!(
                    target: "tsunagi::connection",
                    "Accepted server connection from {}",
                    peer
                );
                let (read_half, write_half) = stream.into_split();
                Ok((
                    TransportReader::new(Box::new(read_half)),
                    TransportWriter::new(Box::new(write_half)),
                ))
            }
        }
    }
}

/// Read half of an open transport, decoding frames.
pub struct TransportReader {
    inner: BufReader<BoxedReader>,
}

impl TransportReader {
    fn new(reader: BoxedReader) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Decode the next frame; `Ok(None)` on clean end-of-stream.
    pub async fn read_message(&mut self) -> Result<Option<Value>, CodecError> {
        codec::read_message(&mut self.inner).await
    }
}

/// Write half of an open transport.
///
/// After [`close`](Self::close) every write fails with `BrokenPipe`.
pub struct TransportWriter {
    inner: Option<BoxedWriter>,
}

impl TransportWriter {
    fn new(writer: BoxedWriter) -> Self {
        Self {
            inner: Some(writer),
        }
    }

    pub async fn write_message(&mut self, message: &Value) -> Result<(), CodecError> {
        let frame = codec::encode(message)?;
        self.write_frame(&frame).await
    }

    /// Write one already encoded frame and flush.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), CodecError> {
        let Some(writer) = self.inner.as_mut() else {
            return Err(CodecError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transport is closed",
            )));
        };
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Half-close the stream. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.inner.take() {
            if let Err(e) = writer.shutdown().await {
                log::debug!(
                    target: "tsunagi::connection",
                    "Ignoring error while closing transport: {}",
                    e
                );
            }
        }
    }
}
