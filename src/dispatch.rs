//! Stream-scoped response dispatch.
//!
//! Given a completed request's stream identity and a response payload, emit
//! exactly one header frame carrying the status followed by exactly one
//! terminal data frame, both on that stream. There are no partial or
//! streaming responses: each request receives a single complete reply.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Result, StreamwireError};
use crate::frame::{OutboundFrame, StreamKey};
use crate::headers::HeaderSet;
use crate::sink::FrameSink;

/// A response payload: status code, optional ordinary header fields, body.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    fields: Vec<(String, String)>,
    body: Bytes,
}

impl Response {
    /// Create a response with a status and body.
    pub fn new(status: u16, body: Bytes) -> Self {
        Self {
            status,
            fields: Vec::new(),
            body,
        }
    }

    /// `202 Accepted` with the given body.
    pub fn accepted(body: Bytes) -> Self {
        Self::new(202, body)
    }

    /// `200 OK` with the given body.
    pub fn ok(body: Bytes) -> Self {
        Self::new(200, body)
    }

    /// Append an ordinary header field, builder-style.
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    /// The status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn header_set(&self) -> HeaderSet {
        let mut headers = HeaderSet::response(self.status);
        for (name, value) in &self.fields {
            headers.append(name, value);
        }
        headers
    }
}

/// Emits responses onto the streams they belong to.
///
/// One dispatcher per connection, sharing the connection's [`FrameSink`].
#[derive(Clone)]
pub struct Dispatcher {
    sink: FrameSink,
}

impl Dispatcher {
    /// Create a dispatcher over a connection's sink.
    pub fn new(sink: FrameSink) -> Self {
        Self { sink }
    }

    /// Send a complete response on the given stream.
    ///
    /// The header frame always precedes the terminal data frame. If the
    /// transport reports the stream already closed, the send is abandoned
    /// and reported, never retried: a reset stream cannot receive a late
    /// reply.
    pub async fn respond(&self, key: StreamKey, response: Response) -> Result<()> {
        debug_assert_eq!(key.connection(), self.sink.connection());
        let stream = key.stream();

        if self.sink.is_closed(stream) {
            warn!(%key, "stream reset before response, abandoning");
            return Err(StreamwireError::DispatchOnClosedStream(key));
        }

        debug!(%key, status = response.status(), "dispatching response");

        self.sink
            .send(OutboundFrame::Headers {
                stream,
                headers: response.header_set(),
                end_of_stream: false,
            })
            .await?;

        self.sink
            .send(OutboundFrame::Data {
                stream,
                bytes: response.body.clone(),
                end_of_stream: true,
            })
            .await
            .map_err(|e| {
                if let StreamwireError::DispatchOnClosedStream(key) = &e {
                    warn!(%key, "stream reset mid-dispatch, abandoning");
                }
                e
            })
    }

    /// Send a header-only terminal acknowledgment with the given status.
    pub async fn send_ack(&self, key: StreamKey, status: u16) -> Result<()> {
        debug_assert_eq!(key.connection(), self.sink.connection());
        let stream = key.stream();

        if self.sink.is_closed(stream) {
            warn!(%key, "stream reset before ack, abandoning");
            return Err(StreamwireError::DispatchOnClosedStream(key));
        }

        self.sink
            .send(OutboundFrame::Headers {
                stream,
                headers: HeaderSet::response(status),
                end_of_stream: true,
            })
            .await
    }
}
