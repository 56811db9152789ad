//! # streamwire
//!
//! Stream reassembly core for an HTTP/2 application endpoint (with an
//! HTTP/1.1 fallback chain chosen at negotiation time).
//!
//! Wire-level concerns — framing, HPACK, flow-control windows, TLS — live
//! in an external frame-transport collaborator. That collaborator delivers
//! decoded [`FrameEvent`]s tagged with a stream identifier and drains
//! outbound frames from a [`FrameSink`]. This crate supplies everything in
//! between:
//!
//! - **Negotiation** ([`negotiate`]): once per connection, pick HTTP/2 or
//!   HTTP/1.1 from the handshake outcome; anything else is fatal.
//! - **Reassembly** ([`Reassembler`]): per (connection, stream), accumulate
//!   header and data frames until end-of-stream and emit one complete
//!   [`LogicalRequest`].
//! - **Dispatch** ([`Dispatcher`]): answer a completed stream with exactly
//!   one header frame followed by one terminal data frame.
//! - **Correlation** ([`Correlator`]): the client-side mirror — open a
//!   stream, send a request, wait (bounded) for that stream's terminal
//!   frame.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use streamwire::{
//!     frame_channel, handler_fn, ConnectionConfig, ConnectionId,
//!     HandshakeOutcome, Response, ServerConnection, SinkConfig,
//! };
//!
//! let (sink, outbound) = frame_channel(ConnectionId::next(), SinkConfig::default());
//! let handler = Arc::new(handler_fn(|request| async move {
//!     Response::accepted(request.body().clone())
//! }));
//! let conn = ServerConnection::negotiate(
//!     &HandshakeOutcome::PriorKnowledge,
//!     sink,
//!     handler,
//!     ConnectionConfig::default(),
//! )?;
//! // conn.run(inbound_events).await;
//! # Ok::<(), streamwire::StreamwireError>(())
//! ```

pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod headers;
pub mod negotiate;
pub mod reassembly;
pub mod sink;
pub mod watermark;

pub use client::{CallOutcome, Correlator, CorrelatorConfig};
pub use connection::{handler_fn, ConnectionConfig, RequestHandler, ServerConnection};
pub use dispatch::{Dispatcher, Response};
pub use error::{Result, StreamwireError};
pub use frame::{ConnectionId, FrameEvent, OutboundFrame, StreamId, StreamKey};
pub use headers::HeaderSet;
pub use negotiate::{negotiate, HandshakeOutcome, Protocol};
pub use reassembly::{LogicalRequest, Reassembler, ReassemblyConfig};
pub use sink::{frame_channel, FrameReceiver, FrameSink, SinkConfig};
pub use watermark::{WatermarkConfig, WriteWatermark};
