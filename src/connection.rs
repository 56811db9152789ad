//! Per-connection server driver.
//!
//! A [`ServerConnection`] is created once per accepted connection, after the
//! transport handshake: negotiation picks the protocol chain, and the driver
//! then owns everything stream-scoped on that connection — the reassembler,
//! the dispatcher, and the handler concurrency gate. All of it is torn down
//! with the connection, so no per-stream state outlives it.
//!
//! The event loop applies frame events in delivery order (preserving
//! intra-stream ordering) and never blocks: completed requests run on
//! spawned handler tasks gated by a semaphore, and their responses are
//! dispatched back onto the originating stream.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::{Dispatcher, Response};
use crate::error::Result;
use crate::frame::{ConnectionId, FrameEvent, StreamId};
use crate::negotiate::{negotiate, HandshakeOutcome, Protocol};
use crate::reassembly::{spawn_idle_sweeper, LogicalRequest, Reassembler, ReassemblyConfig};
use crate::sink::FrameSink;

/// Default maximum concurrently running request handlers per connection.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Reassembly settings (idle window, sweep interval).
    pub reassembly: ReassemblyConfig,
    /// Handler concurrency gate; requests beyond it are dropped with a
    /// warning and the peer observes its own timeout.
    pub max_concurrent_handlers: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reassembly: ReassemblyConfig::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }
}

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Application logic invoked once per completed stream.
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the response for one logical request.
    fn call(&self, request: LogicalRequest) -> BoxFuture<'static, Response>;
}

/// Adapter turning an async closure into a [`RequestHandler`].
pub struct HandlerFn<F>(F);

impl<F, Fut> RequestHandler for HandlerFn<F>
where
    F: Fn(LogicalRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: LogicalRequest) -> BoxFuture<'static, Response> {
        Box::pin((self.0)(request))
    }
}

/// Wrap an async closure as a [`RequestHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(LogicalRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    HandlerFn(f)
}

/// Server-side driver for one negotiated connection.
pub struct ServerConnection {
    id: ConnectionId,
    protocol: Protocol,
    reassembler: Arc<Reassembler>,
    dispatcher: Dispatcher,
    sink: FrameSink,
    handler: Arc<dyn RequestHandler>,
    semaphore: Arc<Semaphore>,
    sweeper: JoinHandle<()>,
}

impl ServerConnection {
    /// Negotiate the protocol for a freshly accepted connection and install
    /// the matching processing chain.
    ///
    /// Exactly one chain is installed; re-negotiation is not supported. An
    /// unknown protocol token is fatal and the connection must be closed.
    pub fn negotiate(
        handshake: &HandshakeOutcome,
        sink: FrameSink,
        handler: Arc<dyn RequestHandler>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let protocol = negotiate(handshake)?;
        let id = sink.connection();

        let reassembler = Arc::new(Reassembler::new(id, &config.reassembly));
        let sweeper = spawn_idle_sweeper(&reassembler, &config.reassembly);

        info!(connection = %id, protocol = protocol.token(), "chain installed");

        Ok(Self {
            id,
            protocol,
            reassembler,
            dispatcher: Dispatcher::new(sink.clone()),
            sink,
            handler,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_handlers)),
            sweeper,
        })
    }

    /// The connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The negotiated protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Number of streams currently mid-reassembly.
    pub fn pending_streams(&self) -> usize {
        self.reassembler.pending_streams()
    }

    /// Drive the connection from a transport event channel until it closes.
    ///
    /// Events are applied in delivery order on this task; per-stream
    /// ordering is therefore preserved while handler execution happens on
    /// spawned worker tasks.
    pub async fn run(&self, mut events: mpsc::Receiver<FrameEvent>) {
        while let Some(event) = events.recv().await {
            let closed = matches!(event, FrameEvent::ConnectionClosed);
            self.handle_event(event);
            if closed {
                return;
            }
        }
        // Transport dropped the channel without a close event.
        self.close();
    }

    /// Apply a single inbound frame event.
    ///
    /// Per-stream violations purge only the offending stream; the
    /// connection continues.
    pub fn handle_event(&self, event: FrameEvent) {
        match event {
            FrameEvent::Headers {
                stream,
                headers,
                end_of_stream,
            } => {
                if let Err(e) = self.reassembler.on_headers(stream, headers) {
                    warn!(connection = %self.id, error = %e, "dropping header frame");
                    return;
                }
                // A terminal header frame is a bodyless request.
                if end_of_stream {
                    self.finish_data(stream, Bytes::new(), true);
                }
            }
            FrameEvent::Data {
                stream,
                bytes,
                end_of_stream,
            } => {
                self.finish_data(stream, bytes, end_of_stream);
            }
            FrameEvent::StreamClosed { stream } => {
                self.sink.mark_closed(stream);
                self.reassembler.on_stream_closed(stream);
            }
            FrameEvent::ConnectionClosed => {
                self.close();
            }
        }
    }

    /// Purge all pending per-connection state.
    pub fn close(&self) {
        let dropped = self.reassembler.close();
        self.sweeper.abort();
        debug!(connection = %self.id, dropped, "connection torn down");
    }

    fn finish_data(&self, stream: StreamId, bytes: Bytes, end_of_stream: bool) {
        match self.reassembler.on_data(stream, bytes, end_of_stream) {
            Ok(Some(request)) => self.spawn_handler(request),
            Ok(None) => {}
            // Already logged by the reassembler; the stream is purged and
            // never answered, the peer observes its own timeout.
            Err(e) => debug!(connection = %self.id, error = %e, "stream dropped"),
        }
    }

    /// Run application logic for one completed request on a worker task.
    fn spawn_handler(&self, request: LogicalRequest) {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                warn!(
                    key = %request.key(),
                    "handler capacity reached, dropping request"
                );
                return;
            }
        };

        let handler = self.handler.clone();
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let key = request.key();
            let response = handler.call(request).await;
            if let Err(e) = dispatcher.respond(key, response).await {
                if e.is_stream_scoped() {
                    warn!(%key, error = %e, "response abandoned");
                } else {
                    error!(%key, error = %e, "response dispatch failed");
                }
            }
        });
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::StreamwireError;
    use crate::frame::OutboundFrame;
    use crate::headers::HeaderSet;
    use crate::sink::{frame_channel, FrameReceiver, SinkConfig};

    fn ack_handler() -> Arc<dyn RequestHandler> {
        Arc::new(handler_fn(|_request| async {
            Response::accepted(Bytes::from_static(b"ack"))
        }))
    }

    fn server(handshake: &HandshakeOutcome) -> Result<(ServerConnection, FrameReceiver)> {
        let (sink, rx) = frame_channel(ConnectionId::next(), SinkConfig::default());
        let conn =
            ServerConnection::negotiate(handshake, sink, ack_handler(), ConnectionConfig::default())?;
        Ok((conn, rx))
    }

    fn headers_event(stream: u32, eos: bool) -> FrameEvent {
        FrameEvent::Headers {
            stream: StreamId::new(stream),
            headers: HeaderSet::request("POST", "/events", "http"),
            end_of_stream: eos,
        }
    }

    fn data_event(stream: u32, payload: &'static [u8], eos: bool) -> FrameEvent {
        FrameEvent::Data {
            stream: StreamId::new(stream),
            bytes: Bytes::from_static(payload),
            end_of_stream: eos,
        }
    }

    async fn expect_response(rx: &mut FrameReceiver, stream: u32) -> Bytes {
        match rx.recv().await.unwrap() {
            OutboundFrame::Headers {
                stream: s,
                headers,
                end_of_stream,
            } => {
                assert_eq!(s, StreamId::new(stream));
                assert_eq!(headers.status(), Some(202));
                assert!(!end_of_stream);
            }
            other => panic!("expected headers, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            OutboundFrame::Data {
                stream: s,
                bytes,
                end_of_stream,
            } => {
                assert_eq!(s, StreamId::new(stream));
                assert!(end_of_stream);
                bytes
            }
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_negotiate_installs_http2_chain() {
        let (conn, _rx) = server(&HandshakeOutcome::Negotiated("h2".into())).unwrap();
        assert_eq!(conn.protocol(), Protocol::Http2);
    }

    #[tokio::test]
    async fn test_negotiate_installs_http11_chain() {
        let (conn, _rx) = server(&HandshakeOutcome::Negotiated("http/1.1".into())).unwrap();
        assert_eq!(conn.protocol(), Protocol::Http11);
    }

    #[tokio::test]
    async fn test_negotiate_unknown_protocol_is_fatal() {
        let result = server(&HandshakeOutcome::Negotiated("spdy/3".into()));
        assert!(matches!(
            result,
            Err(StreamwireError::UnknownProtocol(token)) if token == "spdy/3"
        ));
    }

    #[tokio::test]
    async fn test_completed_stream_gets_a_response() {
        let (conn, mut rx) = server(&HandshakeOutcome::PriorKnowledge).unwrap();

        conn.handle_event(headers_event(1, false));
        conn.handle_event(data_event(1, b"{\"v\":1}", true));

        let body = expect_response(&mut rx, 1).await;
        assert_eq!(&body[..], b"ack");
    }

    #[tokio::test]
    async fn test_bodyless_request_via_terminal_headers() {
        let (conn, mut rx) = server(&HandshakeOutcome::PriorKnowledge).unwrap();

        conn.handle_event(headers_event(1, true));

        let body = expect_response(&mut rx, 1).await;
        assert_eq!(&body[..], b"ack");
    }

    #[tokio::test]
    async fn test_interleaved_streams_answered_independently() {
        // Handler that echoes the request body, to tell streams apart.
        let echo: Arc<dyn RequestHandler> = Arc::new(handler_fn(|request: LogicalRequest| {
            let body = request.body().clone();
            async move { Response::ok(body) }
        }));
        let (sink, mut rx) = frame_channel(ConnectionId::next(), SinkConfig::default());
        let conn = ServerConnection::negotiate(
            &HandshakeOutcome::PriorKnowledge,
            sink,
            echo,
            ConnectionConfig::default(),
        )
        .unwrap();

        conn.handle_event(headers_event(1, false));
        conn.handle_event(headers_event(3, false));
        conn.handle_event(data_event(1, b"a", false));
        conn.handle_event(data_event(3, b"b", true));
        conn.handle_event(data_event(1, b"a", true));

        // Two responses, one per stream, each echoing only its own chunks.
        // Responses from concurrent handler tasks may interleave across
        // streams, but per stream the headers frame still precedes the data.
        let mut headers_seen = std::collections::HashSet::new();
        let mut bodies = std::collections::HashMap::new();
        for _ in 0..4 {
            match rx.recv().await.unwrap() {
                OutboundFrame::Headers { stream, .. } => {
                    headers_seen.insert(stream);
                }
                OutboundFrame::Data { stream, bytes, .. } => {
                    assert!(headers_seen.contains(&stream), "data before headers");
                    bodies.insert(stream.value(), bytes);
                }
            }
        }
        assert_eq!(&bodies[&1][..], b"aa");
        assert_eq!(&bodies[&3][..], b"b");
    }

    #[tokio::test]
    async fn test_missing_headers_stream_is_never_answered() {
        let (conn, mut rx) = server(&HandshakeOutcome::PriorKnowledge).unwrap();

        conn.handle_event(data_event(5, b"orphan", true));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_none());
        assert_eq!(conn.pending_streams(), 0);
    }

    #[tokio::test]
    async fn test_reset_stream_response_is_abandoned() {
        let (conn, mut rx) = server(&HandshakeOutcome::PriorKnowledge).unwrap();

        conn.handle_event(headers_event(1, false));
        conn.handle_event(FrameEvent::StreamClosed {
            stream: StreamId::new(1),
        });
        // The reset dropped the pending state; a late completion for the
        // same stream would be a fresh (headerless) stream.
        assert_eq!(conn.pending_streams(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_connection_close_purges_in_flight_streams() {
        let (conn, _rx) = server(&HandshakeOutcome::PriorKnowledge).unwrap();

        conn.handle_event(headers_event(1, false));
        conn.handle_event(headers_event(3, false));
        assert_eq!(conn.pending_streams(), 2);

        conn.handle_event(FrameEvent::ConnectionClosed);
        assert_eq!(conn.pending_streams(), 0);
    }

    #[tokio::test]
    async fn test_run_applies_events_until_close() {
        let (conn, mut rx) = server(&HandshakeOutcome::PriorKnowledge).unwrap();
        let (tx, events) = mpsc::channel(16);

        tx.send(headers_event(1, false)).await.unwrap();
        tx.send(data_event(1, b"x", true)).await.unwrap();
        tx.send(FrameEvent::ConnectionClosed).await.unwrap();

        conn.run(events).await;

        let body = expect_response(&mut rx, 1).await;
        assert_eq!(&body[..], b"ack");
        assert_eq!(conn.pending_streams(), 0);
    }
}
