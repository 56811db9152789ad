//! Error types for streamwire.

use thiserror::Error;

use crate::frame::StreamKey;

/// Main error type for all streamwire operations.
///
/// Per-stream variants (`DuplicateHeaders`, `MissingHeaders`,
/// `IncompleteStream`, `DispatchOnClosedStream`) are recoverable: the
/// offending stream is purged and the connection continues. Connection-level
/// variants (`UnknownProtocol`, `ConnectionClosed`) tear down all
/// per-connection state.
#[derive(Debug, Error)]
pub enum StreamwireError {
    /// I/O error reported by the frame transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ALPN produced a protocol token this core does not speak. Fatal.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// A header frame arrived for a stream that already completed.
    #[error("Duplicate headers on stream {0}")]
    DuplicateHeaders(StreamKey),

    /// A stream ended without any header block having been observed.
    #[error("Headers not received for stream {0}")]
    MissingHeaders(StreamKey),

    /// A pending stream saw no terminal frame within the idle window.
    #[error("Stream {0} idle without end-of-stream, purged")]
    IncompleteStream(StreamKey),

    /// Response dispatch targeted a stream the peer already reset.
    #[error("Cannot dispatch on closed stream {0}")]
    DispatchOnClosedStream(StreamKey),

    /// No terminal response frame arrived within the wait window.
    #[error("Response timeout")]
    ResponseTimeout,

    /// The connection closed; all pending per-connection state is cancelled.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound admission did not clear within the bounded wait.
    #[error("Write watermark timeout")]
    WatermarkTimeout,
}

impl StreamwireError {
    /// True for errors that are scoped to a single stream and leave the
    /// connection usable.
    pub fn is_stream_scoped(&self) -> bool {
        matches!(
            self,
            StreamwireError::DuplicateHeaders(_)
                | StreamwireError::MissingHeaders(_)
                | StreamwireError::IncompleteStream(_)
                | StreamwireError::DispatchOnClosedStream(_)
        )
    }
}

/// Result type alias using StreamwireError.
pub type Result<T> = std::result::Result<T, StreamwireError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ConnectionId, StreamId, StreamKey};

    fn key() -> StreamKey {
        StreamKey::new(ConnectionId::new(7), StreamId::new(3))
    }

    #[test]
    fn test_stream_scoped_classification() {
        assert!(StreamwireError::DuplicateHeaders(key()).is_stream_scoped());
        assert!(StreamwireError::MissingHeaders(key()).is_stream_scoped());
        assert!(StreamwireError::IncompleteStream(key()).is_stream_scoped());
        assert!(StreamwireError::DispatchOnClosedStream(key()).is_stream_scoped());

        assert!(!StreamwireError::UnknownProtocol("spdy/3".into()).is_stream_scoped());
        assert!(!StreamwireError::ConnectionClosed.is_stream_scoped());
        assert!(!StreamwireError::ResponseTimeout.is_stream_scoped());
    }

    #[test]
    fn test_error_messages_carry_the_stream() {
        let msg = StreamwireError::MissingHeaders(key()).to_string();
        assert!(msg.contains("7/3"), "unexpected message: {msg}");
    }
}
