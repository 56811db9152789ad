//! Per-stream request reassembly.
//!
//! The heart of the crate: converts the interleaved sequence of header and
//! data frame events belonging to one connection into one complete
//! [`LogicalRequest`] per stream. Events for different streams may be applied
//! concurrently; events for the same stream must be applied in delivery
//! order (the transport guarantees intra-stream ordering and this component
//! never reorders).
//!
//! State is strictly per-connection: a [`Reassembler`] is created with its
//! connection and torn down with it, so no stream state can ever leak across
//! connections. Streams that never see a terminal frame are bounded by an
//! idle window and force-purged by [`spawn_idle_sweeper`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::{DashMap, DashSet};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, StreamwireError};
use crate::frame::{ConnectionId, StreamId, StreamKey};
use crate::headers::HeaderSet;

/// Default bound on how long a stream may stay pending without a terminal
/// frame.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(30);

/// Default interval between idle sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Reassembly configuration.
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Idle bound for pending streams; exceeded streams are purged and
    /// reported as incomplete.
    pub idle_window: Duration,
    /// How often the sweeper checks for idle streams.
    pub sweep_interval: Duration,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            idle_window: DEFAULT_IDLE_WINDOW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Mutable per-stream aggregate, alive between the first frame and stream
/// completion.
#[derive(Debug)]
struct PendingRequest {
    headers: Option<HeaderSet>,
    body: BytesMut,
    last_activity: Instant,
}

impl PendingRequest {
    fn new() -> Self {
        Self {
            headers: None,
            body: BytesMut::new(),
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Immutable snapshot of one completed stream, handed to application logic.
#[derive(Debug, Clone)]
pub struct LogicalRequest {
    key: StreamKey,
    headers: HeaderSet,
    body: Bytes,
}

impl LogicalRequest {
    /// The stream this request arrived on; responses are routed by it.
    pub fn key(&self) -> StreamKey {
        self.key
    }

    /// The request's header set.
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// The full reassembled body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Per-connection reassembly state machine.
///
/// Sharded per-key map access keeps independent streams from contending on
/// a single lock.
pub struct Reassembler {
    connection: ConnectionId,
    pending: DashMap<StreamId, PendingRequest>,
    retired: DashSet<StreamId>,
    idle_window: Duration,
}

impl Reassembler {
    /// Create the reassembler for one connection.
    pub fn new(connection: ConnectionId, config: &ReassemblyConfig) -> Self {
        Self {
            connection,
            pending: DashMap::new(),
            retired: DashSet::new(),
            idle_window: config.idle_window,
        }
    }

    /// The connection this reassembler belongs to.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Number of streams currently pending.
    pub fn pending_streams(&self) -> usize {
        self.pending.len()
    }

    /// Record a header block for a stream.
    ///
    /// Creates the pending state on first contact; a later block for a
    /// still-pending stream replaces the recorded header state. A block for
    /// an already-completed stream is a protocol violation
    /// (`DuplicateHeaders`): reported and dropped, the stream is not
    /// reopened.
    pub fn on_headers(&self, stream: StreamId, headers: HeaderSet) -> Result<()> {
        if self.retired.contains(&stream) {
            let key = self.key(stream);
            warn!(%key, "header block for completed stream, dropping");
            return Err(StreamwireError::DuplicateHeaders(key));
        }

        let mut entry = self.pending.entry(stream).or_insert_with(PendingRequest::new);
        entry.headers = Some(headers);
        entry.touch();
        Ok(())
    }

    /// Record a data chunk for a stream.
    ///
    /// Appends to the body buffer, creating the pending state defensively
    /// when data is observed before any header block. On `end_of_stream`
    /// the pending state is purged and either the completed
    /// [`LogicalRequest`] is returned, or `MissingHeaders` is reported when
    /// no header block ever arrived.
    pub fn on_data(
        &self,
        stream: StreamId,
        bytes: Bytes,
        end_of_stream: bool,
    ) -> Result<Option<LogicalRequest>> {
        if self.retired.contains(&stream) {
            debug!(key = %self.key(stream), "data for completed stream, ignoring");
            return Ok(None);
        }

        {
            let mut entry = self.pending.entry(stream).or_insert_with(PendingRequest::new);
            entry.body.extend_from_slice(&bytes);
            entry.touch();
        }

        if !end_of_stream {
            return Ok(None);
        }

        let key = self.key(stream);
        self.retired.insert(stream);
        let Some((_, pending)) = self.pending.remove(&stream) else {
            // Same-stream events are delivered in order, so the entry
            // created above is still there.
            return Err(StreamwireError::MissingHeaders(key));
        };

        match pending.headers {
            Some(headers) => {
                debug!(%key, body_len = pending.body.len(), "stream complete");
                Ok(Some(LogicalRequest {
                    key,
                    headers,
                    body: pending.body.freeze(),
                }))
            }
            None => {
                warn!(%key, "stream ended without headers, dropping");
                Err(StreamwireError::MissingHeaders(key))
            }
        }
    }

    /// Drop a stream's pending state after a transport reset.
    pub fn on_stream_closed(&self, stream: StreamId) {
        if self.pending.remove(&stream).is_some() {
            debug!(key = %self.key(stream), "pending stream reset by transport");
        }
    }

    /// Purge streams idle beyond the configured window.
    ///
    /// Returns the purged keys, each reported as `IncompleteStream`. Bounds
    /// memory under misbehaving or abandoned peers.
    pub fn purge_idle(&self) -> Vec<StreamKey> {
        let now = Instant::now();
        let mut purged = Vec::new();

        self.pending.retain(|stream, pending| {
            if now.duration_since(pending.last_activity) > self.idle_window {
                purged.push(self.key(*stream));
                false
            } else {
                true
            }
        });

        for key in &purged {
            warn!(%key, "no end-of-stream within idle window, purged");
        }
        purged
    }

    /// Purge all pending state; called when the connection closes.
    ///
    /// Returns the number of streams that were still pending.
    pub fn close(&self) -> usize {
        let dropped = self.pending.len();
        if dropped > 0 {
            warn!(
                connection = %self.connection,
                pending = dropped,
                "connection closed with pending streams"
            );
        }
        self.pending.clear();
        self.retired.clear();
        dropped
    }

    fn key(&self, stream: StreamId) -> StreamKey {
        StreamKey::new(self.connection, stream)
    }
}

/// Spawn a background task that periodically purges idle streams.
///
/// The task holds only a weak reference and exits when the reassembler is
/// dropped.
pub fn spawn_idle_sweeper(
    reassembler: &Arc<Reassembler>,
    config: &ReassemblyConfig,
) -> JoinHandle<()> {
    let weak: Weak<Reassembler> = Arc::downgrade(reassembler);
    let interval = config.sweep_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(reassembler) = weak.upgrade() else {
                return;
            };
            reassembler.purge_idle();
        }
    })
}
