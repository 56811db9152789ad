//! Once-per-connection protocol negotiation.
//!
//! An encrypted handshake carries an ALPN token naming the application
//! protocol; a plain-text connection carries none and is assumed to speak
//! HTTP/2 by prior agreement between the peers. Any other token is fatal:
//! the connection is closed, there is no fallback and no re-negotiation.

use tracing::{debug, error};

use crate::error::{Result, StreamwireError};

/// ALPN token for HTTP/2.
pub const ALPN_HTTP2: &str = "h2";

/// ALPN token for HTTP/1.1.
pub const ALPN_HTTP11: &str = "http/1.1";

/// Protocol variant governing a connection after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Multiplexed frame exchange.
    Http2,
    /// One request/response at a time.
    Http11,
}

impl Protocol {
    /// The ALPN token naming this protocol.
    pub fn token(self) -> &'static str {
        match self {
            Protocol::Http2 => ALPN_HTTP2,
            Protocol::Http11 => ALPN_HTTP11,
        }
    }
}

/// Result of the transport-level handshake, as reported by the transport
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// ALPN selected an application protocol during the encrypted handshake.
    Negotiated(String),
    /// No negotiation mechanism was available (plain-text connection).
    PriorKnowledge,
}

/// Decide which protocol governs the connection.
///
/// Runs once per accepted connection. An unrecognized ALPN token is not a
/// recoverable condition: the caller must close the connection.
pub fn negotiate(outcome: &HandshakeOutcome) -> Result<Protocol> {
    match outcome {
        HandshakeOutcome::Negotiated(token) if token == ALPN_HTTP2 => {
            debug!(protocol = ALPN_HTTP2, "negotiated via ALPN");
            Ok(Protocol::Http2)
        }
        HandshakeOutcome::Negotiated(token) if token == ALPN_HTTP11 => {
            debug!(protocol = ALPN_HTTP11, "negotiated via ALPN");
            Ok(Protocol::Http11)
        }
        HandshakeOutcome::Negotiated(token) => {
            error!(protocol = %token, "unknown ALPN protocol, closing connection");
            Err(StreamwireError::UnknownProtocol(token.clone()))
        }
        HandshakeOutcome::PriorKnowledge => {
            // Clear-text peers speak HTTP/2 directly by prior agreement.
            debug!("no ALPN, assuming HTTP/2 prior knowledge");
            Ok(Protocol::Http2)
        }
    }
}
