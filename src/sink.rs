//! Outbound frame handle for one connection.
//!
//! The [`FrameSink`] is the sending half of the transport boundary: the
//! dispatcher and the client correlator queue [`OutboundFrame`]s into it, and
//! the frame transport drains the matching [`FrameReceiver`] to encode and
//! transmit them. The sink enforces two admission rules:
//!
//! - watermark admission: a saturated connection defers sends until the
//!   transport drains below the low watermark
//! - closed-stream ledger: frames for a stream the peer already reset are
//!   rejected rather than queued
//!
//! The sink is cheaply cloneable and safe to share across tasks.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::mpsc;

use crate::error::{Result, StreamwireError};
use crate::frame::{ConnectionId, OutboundFrame, StreamId, StreamKey};
use crate::watermark::{WatermarkConfig, WriteWatermark};

/// Default outbound channel capacity, in frames.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration for one connection's outbound path.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Watermark settings for write admission.
    pub watermark: WatermarkConfig,
    /// Channel capacity between senders and the transport.
    pub channel_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            watermark: WatermarkConfig::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Create a connected sink/receiver pair for one connection.
pub fn frame_channel(connection: ConnectionId, config: SinkConfig) -> (FrameSink, FrameReceiver) {
    let watermark = WriteWatermark::new(config.watermark.clone());
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let sink = FrameSink {
        connection,
        tx,
        watermark: watermark.clone(),
        closed: Arc::new(DashSet::new()),
    };
    let receiver = FrameReceiver { rx, watermark };
    (sink, receiver)
}

/// Handle for queueing outbound frames on one connection.
#[derive(Clone)]
pub struct FrameSink {
    connection: ConnectionId,
    tx: mpsc::Sender<OutboundFrame>,
    watermark: WriteWatermark,
    closed: Arc<DashSet<StreamId>>,
}

impl FrameSink {
    /// The connection this sink writes to.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Queue a frame for transmission.
    ///
    /// Waits for watermark admission first; a saturated connection defers
    /// the send rather than failing it. Errors:
    /// `DispatchOnClosedStream` when the target stream was reset,
    /// `WatermarkTimeout` when admission never cleared,
    /// `ConnectionClosed` when the transport went away.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let stream = frame.stream();
        if self.closed.contains(&stream) {
            return Err(StreamwireError::DispatchOnClosedStream(self.key(stream)));
        }

        self.watermark.admit().await?;

        let size = frame.size();
        self.watermark.record(size);
        self.tx.send(frame).await.map_err(|_| {
            self.watermark.release(size);
            StreamwireError::ConnectionClosed
        })
    }

    /// Record a transport stream-reset notification.
    pub fn mark_closed(&self, stream: StreamId) {
        self.closed.insert(stream);
    }

    /// True when the given stream was reset by the peer.
    pub fn is_closed(&self, stream: StreamId) -> bool {
        self.closed.contains(&stream)
    }

    /// True when the connection currently accepts writes.
    pub fn is_writable(&self) -> bool {
        self.watermark.is_writable()
    }

    /// The watermark gauge shared with the transport.
    pub fn watermark(&self) -> &WriteWatermark {
        &self.watermark
    }

    /// Build the global key for a stream on this connection.
    pub fn key(&self, stream: StreamId) -> StreamKey {
        StreamKey::new(self.connection, stream)
    }
}

/// Transport-side receiving half of the outbound path.
pub struct FrameReceiver {
    rx: mpsc::Receiver<OutboundFrame>,
    watermark: WriteWatermark,
}

impl FrameReceiver {
    /// Take the next queued frame, releasing its watermark bytes.
    ///
    /// A transport that buffers further downstream should instead account
    /// the flush itself via [`watermark`](FrameReceiver::watermark).
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        let frame = self.rx.recv().await?;
        self.watermark.release(frame.size());
        Some(frame)
    }

    /// Non-blocking variant of [`recv`](FrameReceiver::recv).
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        let frame = self.rx.try_recv().ok()?;
        self.watermark.release(frame.size());
        Some(frame)
    }

    /// The watermark gauge shared with the sink.
    pub fn watermark(&self) -> &WriteWatermark {
        &self.watermark
    }
}
