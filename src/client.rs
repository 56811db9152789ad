//! Client-side request/response correlation.
//!
//! The client-side mirror of reassembly: open a new stream, send a request
//! (a headers frame, optionally followed by one terminal data frame), then
//! wait for the terminal response frame belonging to that same stream. The
//! wait is a single-fire completion signal bounded by a timeout; on expiry
//! the caller sees a timeout outcome, never a raw transport error.
//!
//! One [`OutstandingCall`] exists per opened stream; a connection may carry
//! any number of concurrent calls, each on its own stream, all sharing the
//! same [`FrameSink`]. The wait must happen on a caller task, never inside
//! a frame-event callback: [`Correlator::on_frame`] is synchronous and never
//! blocks the event-delivery task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, StreamwireError};
use crate::frame::{ConnectionId, FrameEvent, OutboundFrame, StreamId};
use crate::headers::HeaderSet;
use crate::sink::FrameSink;

/// Default bound on the response wait.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client correlator configuration.
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// How long a call waits for its terminal response frame.
    pub response_timeout: Duration,
    /// Scheme placed in request pseudo-headers.
    pub scheme: String,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            scheme: "http".to_string(),
        }
    }
}

/// Outcome of one client call, as seen by the caller.
#[derive(Debug)]
pub enum CallOutcome {
    /// The stream's terminal frame arrived within the window.
    Completed {
        /// Response headers, when a header frame was observed.
        headers: Option<HeaderSet>,
        /// Accumulated response body.
        body: Bytes,
    },
    /// No terminal frame arrived within the window.
    TimedOut,
}

impl CallOutcome {
    /// True when the response completed within the window.
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Completed { .. })
    }
}

/// One in-flight client request: accumulating response state plus the
/// single-fire completion signal.
struct OutstandingCall {
    headers: Option<HeaderSet>,
    body: BytesMut,
    signal: oneshot::Sender<(Option<HeaderSet>, Bytes)>,
}

/// Client-side stream opener and response correlator for one connection.
pub struct Correlator {
    sink: FrameSink,
    // Client-initiated HTTP/2 streams are odd: 1, 3, 5, ...
    next_stream: AtomicU32,
    calls: DashMap<StreamId, OutstandingCall>,
    response_timeout: Duration,
    scheme: String,
}

impl Correlator {
    /// Create a correlator over a connection's sink.
    pub fn new(sink: FrameSink, config: CorrelatorConfig) -> Self {
        Self {
            sink,
            next_stream: AtomicU32::new(1),
            calls: DashMap::new(),
            response_timeout: config.response_timeout,
            scheme: config.scheme,
        }
    }

    /// The connection this correlator opens streams on.
    pub fn connection(&self) -> ConnectionId {
        self.sink.connection()
    }

    /// Number of calls currently awaiting their terminal frame.
    pub fn outstanding(&self) -> usize {
        self.calls.len()
    }

    /// Send a GET request and wait for its response.
    pub async fn get(&self, path: &str) -> Result<CallOutcome> {
        self.call(HeaderSet::request("GET", path, &self.scheme), None)
            .await
    }

    /// Send a POST request with a body and wait for its response.
    pub async fn post(&self, path: &str, body: Bytes) -> Result<CallOutcome> {
        self.call(HeaderSet::request("POST", path, &self.scheme), Some(body))
            .await
    }

    /// Open a new stream, send the request, and wait (bounded) for the
    /// terminal response frame on that stream.
    ///
    /// The headers frame carries end-of-stream when there is no body;
    /// otherwise a single terminal data frame follows it. Returns
    /// `TimedOut` when the window expires, and `Err(ConnectionClosed)` when
    /// the connection goes away mid-wait.
    pub async fn call(&self, headers: HeaderSet, body: Option<Bytes>) -> Result<CallOutcome> {
        let stream = self.open_stream();
        let (signal, completion) = oneshot::channel();

        let previous = self.calls.insert(
            stream,
            OutstandingCall {
                headers: None,
                body: BytesMut::new(),
                signal,
            },
        );
        // Stream ids are never reused, so a key can hold at most one call.
        debug_assert!(previous.is_none());

        debug!(key = %self.sink.key(stream), "sending request");

        let send_result = async {
            self.sink
                .send(OutboundFrame::Headers {
                    stream,
                    headers,
                    end_of_stream: body.is_none(),
                })
                .await?;
            if let Some(bytes) = body {
                self.sink
                    .send(OutboundFrame::Data {
                        stream,
                        bytes,
                        end_of_stream: true,
                    })
                    .await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = send_result {
            self.calls.remove(&stream);
            return Err(e);
        }

        match tokio::time::timeout(self.response_timeout, completion).await {
            Ok(Ok((headers, body))) => Ok(CallOutcome::Completed { headers, body }),
            // The signal sender was dropped: connection teardown.
            Ok(Err(_)) => Err(StreamwireError::ConnectionClosed),
            Err(_) => {
                self.calls.remove(&stream);
                warn!(
                    key = %self.sink.key(stream),
                    timeout = ?self.response_timeout,
                    "no terminal response frame within window"
                );
                Ok(CallOutcome::TimedOut)
            }
        }
    }

    /// Apply one inbound frame event.
    ///
    /// Header frames are observed and recorded but resolve the call only
    /// when they carry end-of-stream; data frames accumulate and resolve on
    /// end-of-stream. Frames for streams without an outstanding call are
    /// ignored.
    pub fn on_frame(&self, event: FrameEvent) {
        match event {
            FrameEvent::Headers {
                stream,
                headers,
                end_of_stream,
            } => {
                let Some(mut call) = self.calls.get_mut(&stream) else {
                    return;
                };
                debug!(key = %self.sink.key(stream), %headers, "received response headers");
                call.headers = Some(headers);
                drop(call);
                if end_of_stream {
                    self.complete(stream);
                }
            }
            FrameEvent::Data {
                stream,
                bytes,
                end_of_stream,
            } => {
                let Some(mut call) = self.calls.get_mut(&stream) else {
                    return;
                };
                call.body.extend_from_slice(&bytes);
                drop(call);
                if end_of_stream {
                    self.complete(stream);
                }
            }
            FrameEvent::StreamClosed { stream } => {
                self.sink.mark_closed(stream);
                // Dropping the call drops its signal; the waiter observes
                // ConnectionClosed rather than waiting out the timeout.
                self.calls.remove(&stream);
            }
            FrameEvent::ConnectionClosed => {
                self.close();
            }
        }
    }

    /// Fail every outstanding call; used on connection teardown.
    ///
    /// Waiters observe `ConnectionClosed`. Returns the number of calls
    /// cancelled.
    pub fn close(&self) -> usize {
        let cancelled = self.calls.len();
        if cancelled > 0 {
            warn!(
                connection = %self.connection(),
                cancelled,
                "connection closed with outstanding calls"
            );
        }
        self.calls.clear();
        cancelled
    }

    fn open_stream(&self) -> StreamId {
        StreamId::new(self.next_stream.fetch_add(2, Ordering::Relaxed))
    }

    fn complete(&self, stream: StreamId) {
        if let Some((_, call)) = self.calls.remove(&stream) {
            debug!(key = %self.sink.key(stream), "response complete");
            // A dropped receiver means the caller already timed out.
            let _ = call.signal.send((call.headers, call.body.freeze()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::sink::{frame_channel, FrameReceiver, SinkConfig};

    fn correlator(timeout: Duration) -> (Arc<Correlator>, FrameReceiver) {
        let (sink, rx) = frame_channel(ConnectionId::next(), SinkConfig::default());
        let config = CorrelatorConfig {
            response_timeout: timeout,
            ..CorrelatorConfig::default()
        };
        (Arc::new(Correlator::new(sink, config)), rx)
    }

    fn terminal_data(stream: u32, payload: &'static [u8]) -> FrameEvent {
        FrameEvent::Data {
            stream: StreamId::new(stream),
            bytes: Bytes::from_static(payload),
            end_of_stream: true,
        }
    }

    #[tokio::test]
    async fn test_terminal_frame_resolves_the_call() {
        let (correlator, _rx) = correlator(Duration::from_secs(1));

        let feeder = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            // First call opens stream 1.
            feeder.on_frame(FrameEvent::Headers {
                stream: StreamId::new(1),
                headers: HeaderSet::response(202),
                end_of_stream: false,
            });
            feeder.on_frame(terminal_data(1, b"ack"));
        });

        let outcome = correlator.get("/").await.unwrap();
        match outcome {
            CallOutcome::Completed { headers, body } => {
                assert_eq!(headers.unwrap().status(), Some(202));
                assert_eq!(&body[..], b"ack");
            }
            CallOutcome::TimedOut => panic!("expected completion"),
        }
        assert_eq!(correlator.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_foreign_stream_does_not_resolve_the_call() {
        let (correlator, _rx) = correlator(Duration::from_millis(50));

        let feeder = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            // Terminal frame for a stream this call is not waiting on.
            feeder.on_frame(terminal_data(99, b"other"));
        });

        let outcome = correlator.get("/").await.unwrap();
        assert!(!outcome.is_success(), "foreign stream must not resolve");
    }

    #[tokio::test]
    async fn test_header_only_frame_without_terminal_flag_does_not_resolve() {
        let (correlator, _rx) = correlator(Duration::from_millis(50));

        let feeder = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeder.on_frame(FrameEvent::Headers {
                stream: StreamId::new(1),
                headers: HeaderSet::response(200),
                end_of_stream: false,
            });
        });

        let outcome = correlator.get("/").await.unwrap();
        assert!(matches!(outcome, CallOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_terminal_header_frame_resolves_with_empty_body() {
        let (correlator, _rx) = correlator(Duration::from_secs(1));

        let feeder = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeder.on_frame(FrameEvent::Headers {
                stream: StreamId::new(1),
                headers: HeaderSet::response(204),
                end_of_stream: true,
            });
        });

        match correlator.get("/").await.unwrap() {
            CallOutcome::Completed { headers, body } => {
                assert_eq!(headers.unwrap().status(), Some(204));
                assert!(body.is_empty());
            }
            CallOutcome::TimedOut => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn test_no_response_times_out() {
        let (correlator, _rx) = correlator(Duration::from_millis(20));

        let outcome = correlator.get("/").await.unwrap();
        assert!(matches!(outcome, CallOutcome::TimedOut));
        assert_eq!(correlator.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_post_sends_headers_then_terminal_data() {
        let (correlator, mut rx) = correlator(Duration::from_millis(20));

        let _ = correlator.post("/events", Bytes::from_static(b"{}")).await;

        match rx.recv().await.unwrap() {
            OutboundFrame::Headers {
                stream,
                headers,
                end_of_stream,
            } => {
                assert_eq!(stream, StreamId::new(1));
                assert_eq!(headers.pseudo().method(), Some("POST"));
                assert_eq!(headers.pseudo().path(), Some("/events"));
                assert!(!end_of_stream, "a body follows");
            }
            other => panic!("expected headers, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            OutboundFrame::Data {
                bytes,
                end_of_stream,
                ..
            } => {
                assert_eq!(&bytes[..], b"{}");
                assert!(end_of_stream);
            }
            other => panic!("expected terminal data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_headers_frame_is_terminal() {
        let (correlator, mut rx) = correlator(Duration::from_millis(20));

        let _ = correlator.get("/").await;

        match rx.recv().await.unwrap() {
            OutboundFrame::Headers { end_of_stream, .. } => {
                assert!(end_of_stream, "no body: headers carry end-of-stream");
            }
            other => panic!("expected headers, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_ids_are_odd_and_increasing() {
        let (correlator, mut rx) = correlator(Duration::from_millis(10));

        let _ = correlator.get("/a").await;
        let _ = correlator.get("/b").await;

        let first = rx.recv().await.unwrap().stream();
        let second = rx.recv().await.unwrap().stream();
        assert_eq!(first, StreamId::new(1));
        assert_eq!(second, StreamId::new(3));
    }

    #[tokio::test]
    async fn test_connection_close_fails_outstanding_calls() {
        let (correlator, _rx) = correlator(Duration::from_secs(5));

        let closer = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(closer.close(), 1);
        });

        let result = correlator.get("/").await;
        assert!(matches!(result, Err(StreamwireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connection_closed_event_fails_outstanding_calls() {
        let (correlator, _rx) = correlator(Duration::from_secs(5));

        let feeder = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeder.on_frame(FrameEvent::ConnectionClosed);
        });

        let result = correlator.get("/").await;
        assert!(matches!(result, Err(StreamwireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_stream_reset_fails_only_that_call() {
        let (correlator, _rx) = correlator(Duration::from_secs(1));

        // Stagger the spawns so stream allocation is deterministic:
        // call_a takes stream 1, call_b takes stream 3.
        let c1 = correlator.clone();
        let call_a = tokio::spawn(async move { c1.get("/a").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let c2 = correlator.clone();
        let call_b = tokio::spawn(async move { c2.get("/b").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(correlator.outstanding(), 2);

        // Reset stream 1; complete stream 3 normally.
        correlator.on_frame(FrameEvent::StreamClosed {
            stream: StreamId::new(1),
        });
        correlator.on_frame(terminal_data(3, b"ok"));

        assert!(matches!(
            call_a.await.unwrap(),
            Err(StreamwireError::ConnectionClosed)
        ));
        assert!(call_b.await.unwrap().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_multi_chunk_response_body_accumulates() {
        let (correlator, _rx) = correlator(Duration::from_secs(1));

        let feeder = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feeder.on_frame(FrameEvent::Data {
                stream: StreamId::new(1),
                bytes: Bytes::from_static(b"part1-"),
                end_of_stream: false,
            });
            feeder.on_frame(terminal_data(1, b"part2"));
        });

        match correlator.get("/").await.unwrap() {
            CallOutcome::Completed { body, .. } => assert_eq!(&body[..], b"part1-part2"),
            CallOutcome::TimedOut => panic!("expected completion"),
        }
    }
}
