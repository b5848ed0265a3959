//! # Connection
//!
//! Wires one transport into the pipelined reader and writer.
//!
//! ```text
//!                 ┌── pump ──► inbound pipe ──► PacketStream ──► recv()
//! transport ──────┤
//!                 └◄─ drain ◄─ outbound pipe ◄── writer loop ◄── send()
//! ```
//!
//! Three tasks run per connection: the pump, the writer loop and the drain.
//! Decoding runs on the caller's task inside [`Connection::recv`], so
//! packets are delivered in wire order with no extra hop.
//!
//! The writer loop takes every packet already waiting in the send queue,
//! encodes them back to back and flushes once, so bursts are batched into
//! a single write to the outbound pipe.
//!
//! All tasks share one cancellation token. The first fatal error seen by
//! any side is recorded once, cancels everything, and is what later
//! `recv`/`send` calls report. Encryption, when needed, is applied to the
//! transport before it is handed to [`Connection::spawn`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use once_cell::sync::OnceCell;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::config::WireConfig;
use crate::core::codec::{CompressionThreshold, PacketCodec};
use crate::core::packet::{OutgoingPacket, Packet};
use crate::error::{ProtocolError, Result};
use crate::transport::pipe::{pipe, pump, PipeReader, PipeWriter};
use crate::transport::pipeline::{PacketStream, PipelineWriter};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::metrics::global_metrics;

struct Shared {
    cancel: CancellationToken,
    first_error: OnceCell<ProtocolError>,
}

impl Shared {
    /// Record `error` if it is the first one, then tear everything down.
    fn fail(&self, error: ProtocolError) {
        if !matches!(error, ProtocolError::Cancelled) {
            let description = error.to_string();
            if self.first_error.set(error).is_ok() {
                warn!(error = %description, "Connection failed");
            }
        }
        self.cancel.cancel();
    }

    fn terminal_error(&self) -> ProtocolError {
        self.first_error
            .get()
            .map(ProtocolError::duplicate)
            .unwrap_or(ProtocolError::ConnectionClosed)
    }
}

#[derive(Clone)]
enum QueueTx {
    Bounded(mpsc::Sender<OutgoingPacket>),
    Unbounded(mpsc::UnboundedSender<OutgoingPacket>),
}

enum QueueRx {
    Bounded(mpsc::Receiver<OutgoingPacket>),
    Unbounded(mpsc::UnboundedReceiver<OutgoingPacket>),
}

impl QueueRx {
    async fn recv(&mut self) -> Option<OutgoingPacket> {
        match self {
            QueueRx::Bounded(rx) => rx.recv().await,
            QueueRx::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<OutgoingPacket> {
        match self {
            QueueRx::Bounded(rx) => rx.try_recv().ok(),
            QueueRx::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

fn send_queue(capacity: Option<usize>) -> (QueueTx, QueueRx) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (QueueTx::Bounded(tx), QueueRx::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueTx::Unbounded(tx), QueueRx::Unbounded(rx))
        }
    }
}

/// Cloneable handle for queueing outbound packets
#[derive(Clone)]
pub struct Outbound {
    tx: QueueTx,
    shared: Arc<Shared>,
}

impl Outbound {
    /// Queue `packet` for the writer loop.
    ///
    /// Waits for room when the queue is bounded. Fails with the
    /// connection's terminal error once it has shut down.
    pub async fn send(&self, packet: OutgoingPacket) -> Result<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(self.shared.terminal_error());
        }
        let queued = match &self.tx {
            QueueTx::Bounded(tx) => tx.send(packet).await.is_ok(),
            QueueTx::Unbounded(tx) => tx.send(packet).is_ok(),
        };
        if queued {
            Ok(())
        } else {
            Err(self.shared.terminal_error())
        }
    }
}

/// A running packet connection over one transport
pub struct Connection {
    incoming: PacketStream<PipeReader>,
    outbound: Option<Outbound>,
    writer_threshold: CompressionThreshold,
    shared: Arc<Shared>,
    pump_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    drain_task: Option<JoinHandle<()>>,
    closed: AtomicBool,
}

impl Connection {
    /// Start a connection with a buffer pool built from `config.pool`
    pub fn spawn<T>(io: T, config: &WireConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn_with_pool(io, config, config.pool.build())
    }

    /// Start a connection sharing `pool` with other connections
    #[instrument(skip_all, fields(threshold = config.codec.compression_threshold))]
    pub fn spawn_with_pool<T>(io: T, config: &WireConfig, pool: BufferPool) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let shared = Arc::new(Shared {
            cancel: CancellationToken::new(),
            first_error: OnceCell::new(),
        });
        let chunk = config.pipe.read_chunk_size;
        let initial = config.codec.compression_threshold;

        let (read_half, write_half) = tokio::io::split(io);
        let (inbound_tx, inbound_rx) = pipe(config.pipe.inbound);
        let (outbound_tx, outbound_rx) = pipe(config.pipe.outbound);
        let (queue_tx, queue_rx) = send_queue(config.pipe.send_queue);

        let reader_codec = PacketCodec::from_config(&config.codec, CompressionThreshold::new(initial), pool.clone());
        let writer_codec = PacketCodec::from_config(&config.codec, CompressionThreshold::new(initial), pool);
        let writer_threshold = writer_codec.threshold().clone();

        let pump_task = tokio::spawn(
            run_pump(read_half, inbound_tx, chunk, shared.clone()).instrument(info_span!("pump")),
        );
        let writer_task = tokio::spawn(
            run_writer(queue_rx, PipelineWriter::new(outbound_tx, writer_codec), shared.clone())
                .instrument(info_span!("writer")),
        );
        let drain_task = tokio::spawn(
            run_drain(outbound_rx, write_half, chunk, shared.clone()).instrument(info_span!("drain")),
        );

        global_metrics().connection_established();
        info!("Connection started");

        Self {
            incoming: PacketStream::with_read_chunk(inbound_rx, reader_codec, shared.cancel.clone(), chunk),
            outbound: Some(Outbound {
                tx: queue_tx,
                shared: shared.clone(),
            }),
            writer_threshold,
            shared,
            pump_task: Some(pump_task),
            writer_task: Some(writer_task),
            drain_task: Some(drain_task),
            closed: AtomicBool::new(false),
        }
    }

    /// Receive the next packet.
    ///
    /// # Errors
    /// The first fatal error of the connection, or `ConnectionClosed` when
    /// the peer finished cleanly or the connection was closed locally.
    pub async fn recv(&mut self) -> Result<Packet> {
        match self.incoming.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => {
                self.shared.fail(e.duplicate());
                Err(e)
            }
            None => Err(self.shared.terminal_error()),
        }
    }

    /// Queue `packet` for sending.
    pub async fn send(&self, packet: OutgoingPacket) -> Result<()> {
        match &self.outbound {
            Some(outbound) => outbound.send(packet).await,
            None => Err(self.shared.terminal_error()),
        }
    }

    /// Handle for sending from other tasks
    pub fn outbound(&self) -> Option<Outbound> {
        self.outbound.clone()
    }

    /// Threshold applied to incoming frames
    pub fn reader_threshold(&self) -> &CompressionThreshold {
        self.incoming.threshold()
    }

    /// Threshold applied to outgoing frames
    pub fn writer_threshold(&self) -> &CompressionThreshold {
        &self.writer_threshold
    }

    /// Switch compression on both sides, as done when the peer announces a
    /// threshold.
    pub fn switch_compression(&self, threshold: i32) {
        self.reader_threshold().set(threshold);
        self.writer_threshold.set(threshold);
    }

    /// First fatal error, if any
    pub fn error(&self) -> Option<&ProtocolError> {
        self.shared.first_error.get()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shared.cancel.is_cancelled()
    }

    /// Cancel every task of this connection. Calling it again is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.cancel.cancel();
        global_metrics().connection_closed();
        info!("Connection closed");
    }

    /// Send everything still queued, close the outbound side and stop.
    ///
    /// Other [`Outbound`] clones must be dropped first, or the writer keeps
    /// waiting for them.
    pub async fn shutdown(mut self) -> Result<()> {
        self.outbound = None;
        for task in [self.writer_task.take(), self.drain_task.take()].into_iter().flatten() {
            if task.await.is_err() {
                debug!("Connection task ended abnormally");
            }
        }
        self.close();
        if let Some(task) = self.pump_task.take() {
            let _ = task.await;
        }

        match self.shared.first_error.get() {
            Some(e) => Err(e.duplicate()),
            None => Ok(()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_pump<T: AsyncRead>(read_half: ReadHalf<T>, mut inbound: PipeWriter, chunk: usize, shared: Arc<Shared>) {
    match pump(read_half, &mut inbound, chunk, shared.cancel.clone()).await {
        Ok(total) => debug!(total, "Transport finished"),
        Err(e) => shared.fail(e),
    }
    // Dropped only after a failure is recorded so the reader reports it.
    drop(inbound);
}

async fn run_drain<T: AsyncWrite>(outbound: PipeReader, write_half: WriteHalf<T>, chunk: usize, shared: Arc<Shared>) {
    match pump(outbound, write_half, chunk, shared.cancel.clone()).await {
        Ok(total) => debug!(total, "Outbound side finished"),
        Err(e) => shared.fail(e),
    }
}

async fn run_writer(mut queue: QueueRx, mut writer: PipelineWriter<PipeWriter>, shared: Arc<Shared>) {
    let result: Result<()> = async {
        loop {
            let first = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => return Err(ProtocolError::Cancelled),
                next = queue.recv() => next,
            };
            let Some(first) = first else {
                return writer.close().await;
            };

            writer.write_packet(first)?;
            let mut batched = 1usize;
            while let Some(packet) = queue.try_recv() {
                writer.write_packet(packet)?;
                batched += 1;
            }

            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => return Err(ProtocolError::Cancelled),
                flushed = writer.flush() => {
                    let bytes = flushed?;
                    debug!(packets = batched, bytes, "Flushed batch");
                }
            }
        }
    }
    .await;

    if let Err(e) = result {
        shared.fail(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (io, _peer) = tokio::io::duplex(64);
        let mut conn = Connection::spawn(io, &WireConfig::default());

        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(matches!(conn.recv().await, Err(ProtocolError::ConnectionClosed)));
        assert!(matches!(
            conn.send(OutgoingPacket::new(1, vec![])).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_first_error_is_reported() {
        let (io, mut peer) = tokio::io::duplex(64);
        let mut conn = Connection::spawn(io, &WireConfig::default());

        peer.write_all(&[0x00]).await.unwrap();
        assert!(matches!(conn.recv().await, Err(ProtocolError::InvalidFrame(_))));
        assert!(matches!(conn.error(), Some(ProtocolError::InvalidFrame(_))));
        assert!(matches!(
            conn.send(OutgoingPacket::new(1, vec![])).await,
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queue() {
        let (io, mut peer) = tokio::io::duplex(4096);
        let conn = Connection::spawn(io, &WireConfig::default());

        for id in 0..3 {
            conn.send(OutgoingPacket::new(id, vec![id as u8; 2])).await.unwrap();
        }
        conn.shutdown().await.unwrap();

        let mut wire = Vec::new();
        peer.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, vec![3, 0, 0, 0, 3, 1, 1, 1, 3, 2, 2, 2]);
    }
}
