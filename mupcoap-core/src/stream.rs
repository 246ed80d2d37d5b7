//! Duplex byte stream abstraction.
//!
//! The serial link to the device is a single duplex byte stream shared by
//! the MUP1 control channel and raw CoAP traffic. [`DuplexStream`] is the
//! seam between the transport logic and however the stream was acquired
//! (USB serial port, TCP bridge, in-memory test double).

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// Default size of the buffer used for a single [`TokioDuplexStream::read`].
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// A duplex byte stream with independent read and write sides.
///
/// Both methods take `&self` so that a background reader can wait on
/// `read()` while writes are issued from elsewhere.
///
/// Single-core design - no Send bounds needed.
#[async_trait(?Send)]
pub trait DuplexStream: 'static {
    /// Write all of `bytes` to the stream.
    async fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Read the next chunk of available bytes.
    ///
    /// An empty vector means "nothing available yet" and is distinct from
    /// an error. Streams that cannot tell the two apart should report
    /// closure as an error.
    async fn read(&self) -> io::Result<Vec<u8>>;
}

/// [`DuplexStream`] over any Tokio `AsyncRead + AsyncWrite`.
///
/// A zero-byte read from the inner stream means end of stream for Tokio
/// I/O types, so it is reported as [`io::ErrorKind::UnexpectedEof`] rather
/// than as an empty chunk.
pub struct TokioDuplexStream<T> {
    reader: Mutex<ReadHalf<T>>,
    writer: Mutex<WriteHalf<T>>,
    read_buffer_size: usize,
}

impl<T: AsyncRead + AsyncWrite> TokioDuplexStream<T> {
    /// Wrap a Tokio stream.
    pub fn new(inner: T) -> Self {
        Self::with_read_buffer(inner, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Wrap a Tokio stream, reading at most `read_buffer_size` bytes per chunk.
    pub fn with_read_buffer(inner: T, read_buffer_size: usize) -> Self {
        let (reader, writer) = tokio::io::split(inner);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            read_buffer_size: read_buffer_size.max(1),
        }
    }
}

#[async_trait(?Send)]
impl<T: AsyncRead + AsyncWrite + 'static> DuplexStream for TokioDuplexStream<T> {
    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    async fn read(&self) -> io::Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        let mut buf = vec![0u8; self.read_buffer_size];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed by peer",
            ));
        }
        buf.truncate(n);
        Ok(buf)
    }
}

/// Whether a stream error means the stream will never produce data again.
pub fn is_fatal_stream_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}
