//! Local socket transport.
//!
//! The `Connector` trait is the seam between the link and the OS: the
//! production `UnixConnector` opens the daemon's RPC socket, tests plug in
//! in-memory streams.
//!
//! Once a stream is connected, `Connection::open` splits it into a reader
//! task (bytes to `Frame`s) and a writer task (`Request`s to bytes). Both
//! report back to the link actor over its event channel, tagged with the
//! connection's generation so events from a torn-down connection are
//! recognisably stale.

use std::path::Path;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use lnm_core::TransportError;
use lnm_protocol::{FrameCodec, Request};

use crate::link::ActorEvent;

/// Initial read buffer capacity. `listnodes` replies routinely exceed it.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

// ============================================================================
// Connector Seam
// ============================================================================

/// A bidirectional byte stream to the daemon.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed stream handed from a `Connector` to the link.
pub type BoxedStream = Box<dyn LinkStream>;

/// Opens streams to the daemon's RPC endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects to the endpoint at `path`.
    ///
    /// # Errors
    ///
    /// A `TransportError` naming why the endpoint could not be reached.
    async fn connect(&self, path: &Path) -> Result<BoxedStream, TransportError>;
}

/// Connects over a Unix domain socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixConnector;

#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self, path: &Path) -> Result<BoxedStream, TransportError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Box::new(stream))
    }
}

// ============================================================================
// Live Connection
// ============================================================================

/// I/O tasks for one connected stream.
///
/// Dropping the connection cancels both tasks and closes the stream.
#[derive(Debug)]
pub(crate) struct Connection {
    generation: u64,
    outbound: mpsc::UnboundedSender<Request>,
    cancel: CancellationToken,
}

impl Connection {
    /// Spawns the reader and writer tasks for `stream`.
    pub(crate) fn open(
        stream: BoxedStream,
        generation: u64,
        events: mpsc::UnboundedSender<ActorEvent>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_loop(reader, generation, events.clone(), cancel.clone()));
        tokio::spawn(write_loop(writer, outbound_rx, generation, events, cancel.clone()));

        Self {
            generation,
            outbound,
            cancel,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues a request for the writer task.
    ///
    /// Hands the request back if the writer has already stopped.
    pub(crate) fn send(&self, request: Request) -> Result<(), Request> {
        self.outbound.send(request).map_err(|err| err.0)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    generation: u64,
    events: mpsc::UnboundedSender<ActorEvent>,
    cancel: CancellationToken,
) {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);

    let error = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                trace!(generation, "Reader cancelled");
                return;
            }
            read = reader.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                // Peer closed: flush whatever complete frames remain.
                while let Ok(Some(frame)) = codec.decode_eof(&mut buf) {
                    let _ = events.send(ActorEvent::Frame { generation, frame });
                }
                debug!(generation, "Daemon closed the socket");
                break None;
            }
            Ok(n) => {
                trace!(generation, bytes = n, "Read from socket");
                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(frame)) => {
                            let _ = events.send(ActorEvent::Frame { generation, frame });
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(generation, error = %e, "Frame decoder failed, dropping buffer");
                            buf.clear();
                            break;
                        }
                    }
                }
            }
            Err(e) => break Some(TransportError::from(e)),
        }
    };

    let _ = events.send(ActorEvent::TransportClosed { generation, error });
}

async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    mut outbound: mpsc::UnboundedReceiver<Request>,
    generation: u64,
    events: mpsc::UnboundedSender<ActorEvent>,
    cancel: CancellationToken,
) {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = writer.shutdown().await;
                return;
            }
            request = outbound.recv() => match request {
                Some(request) => request,
                None => return,
            },
        };

        buf.clear();
        if let Err(e) = codec.encode(&request, &mut buf) {
            warn!(id = request.id, method = %request.method, error = %e, "Failed to encode request");
            continue;
        }

        trace!(generation, id = request.id, method = %request.method, "Sending request");
        let written = match writer.write_all(&buf).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = events.send(ActorEvent::TransportClosed {
                generation,
                error: Some(TransportError::from(e)),
            });
            return;
        }
    }
}
