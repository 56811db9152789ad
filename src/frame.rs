//! Stream identity and frame event types.
//!
//! The frame transport collaborator decodes wire-level frames (framing,
//! HPACK, flow control) and delivers them as [`FrameEvent`]s tagged with a
//! stream identifier. Outbound traffic travels the other way as
//! [`OutboundFrame`]s. This module defines those boundary types plus the
//! identity types that name a stream:
//!
//! - [`ConnectionId`] — process-unique transport session identity
//! - [`StreamId`] — unique only within its connection
//! - [`StreamKey`] — the composite of both, globally unique

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::headers::HeaderSet;

/// Identity of one transport-level session.
///
/// Stream identifiers repeat across connections, so every piece of
/// per-stream state is keyed by the combination of connection and stream
/// identity, never by the stream identifier alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a connection id from a raw value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next process-unique connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a logical stream within one connection.
///
/// Client-initiated HTTP/2 streams use odd identifiers (1, 3, 5, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    /// Create a stream id from a raw value.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique stream identity: connection identity plus stream
/// identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    connection: ConnectionId,
    stream: StreamId,
}

impl StreamKey {
    /// Combine a connection identity and a stream identifier.
    pub const fn new(connection: ConnectionId, stream: StreamId) -> Self {
        Self { connection, stream }
    }

    /// The connection this stream belongs to.
    #[inline]
    pub const fn connection(self) -> ConnectionId {
        self.connection
    }

    /// The stream identifier within the connection.
    #[inline]
    pub const fn stream(self) -> StreamId {
        self.stream
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.stream)
    }
}

/// Decoded inbound frame event, delivered by the transport in per-stream
/// order.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// A decoded header block for a stream.
    Headers {
        /// Stream the block belongs to.
        stream: StreamId,
        /// The decoded header set.
        headers: HeaderSet,
        /// True when no further frames follow in this direction.
        end_of_stream: bool,
    },
    /// A chunk of body data for a stream.
    Data {
        /// Stream the chunk belongs to.
        stream: StreamId,
        /// The chunk bytes.
        bytes: Bytes,
        /// True when no further frames follow in this direction.
        end_of_stream: bool,
    },
    /// The transport reset or closed a single stream.
    StreamClosed {
        /// The closed stream.
        stream: StreamId,
    },
    /// The transport session closed; no further events will arrive.
    ConnectionClosed,
}

impl FrameEvent {
    /// The stream this event targets, if it is stream-scoped.
    pub fn stream(&self) -> Option<StreamId> {
        match self {
            FrameEvent::Headers { stream, .. }
            | FrameEvent::Data { stream, .. }
            | FrameEvent::StreamClosed { stream } => Some(*stream),
            FrameEvent::ConnectionClosed => None,
        }
    }
}

/// Outbound frame handed to the transport for encoding and transmission.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A header block to send on a stream.
    Headers {
        /// Target stream.
        stream: StreamId,
        /// The header set to encode.
        headers: HeaderSet,
        /// Terminal flag.
        end_of_stream: bool,
    },
    /// Body bytes to send on a stream.
    Data {
        /// Target stream.
        stream: StreamId,
        /// The payload.
        bytes: Bytes,
        /// Terminal flag.
        end_of_stream: bool,
    },
}

impl OutboundFrame {
    /// The stream this frame targets.
    pub fn stream(&self) -> StreamId {
        match self {
            OutboundFrame::Headers { stream, .. } | OutboundFrame::Data { stream, .. } => *stream,
        }
    }

    /// Approximate wire cost in bytes, used for watermark accounting.
    pub fn size(&self) -> usize {
        match self {
            OutboundFrame::Headers { headers, .. } => headers.encoded_len_estimate(),
            OutboundFrame::Data { bytes, .. } => bytes.len(),
        }
    }

    /// True when this frame carries the end-of-stream flag.
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            OutboundFrame::Headers { end_of_stream, .. }
            | OutboundFrame::Data { end_of_stream, .. } => *end_of_stream,
        }
    }
}
