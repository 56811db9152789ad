//! In-process loopback demo.
//!
//! Wires a client correlator to a server connection through frame pumps (the
//! role a real frame transport plays), POSTs a JSON document, and prints the
//! JSON acknowledgment that comes back.
//!
//! Run with: `cargo run --example loopback`

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use streamwire::{
    frame_channel, handler_fn, CallOutcome, ConnectionConfig, ConnectionId, Correlator,
    CorrelatorConfig, FrameEvent, HandshakeOutcome, OutboundFrame, Response, ServerConnection,
    SinkConfig,
};

fn as_event(frame: OutboundFrame) -> FrameEvent {
    match frame {
        OutboundFrame::Headers {
            stream,
            headers,
            end_of_stream,
        } => FrameEvent::Headers {
            stream,
            headers,
            end_of_stream,
        },
        OutboundFrame::Data {
            stream,
            bytes,
            end_of_stream,
        } => FrameEvent::Data {
            stream,
            bytes,
            end_of_stream,
        },
    }
}

#[tokio::main]
async fn main() -> streamwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamwire=debug,loopback=info".into()),
        )
        .init();

    let handler = Arc::new(handler_fn(|request: streamwire::LogicalRequest| {
        let key = request.key();
        let body = request.body().clone();
        async move {
            info!(%key, bytes = body.len(), "request received");
            let ack = serde_json::json!({
                "response-code": "202",
                "response-message": "Accepted",
            });
            Response::accepted(Bytes::from(ack.to_string()))
                .with_field("content-type", "application/json")
        }
    }));

    let (server_sink, mut server_out) = frame_channel(ConnectionId::next(), SinkConfig::default());
    let server = Arc::new(ServerConnection::negotiate(
        &HandshakeOutcome::Negotiated("h2".into()),
        server_sink,
        handler,
        ConnectionConfig::default(),
    )?);

    let (client_sink, mut client_out) = frame_channel(ConnectionId::next(), SinkConfig::default());
    let client = Arc::new(Correlator::new(client_sink, CorrelatorConfig::default()));

    // client -> server pump
    let server_side = server.clone();
    tokio::spawn(async move {
        while let Some(frame) = client_out.recv().await {
            server_side.handle_event(as_event(frame));
        }
    });

    // server -> client pump
    let client_side = client.clone();
    tokio::spawn(async move {
        while let Some(frame) = server_out.recv().await {
            client_side.on_frame(as_event(frame));
        }
    });

    let body = serde_json::json!({
        "http2": true,
        "title": "loopback demo",
    });
    info!(request = %body, "posting");

    match client.post("/events", Bytes::from(body.to_string())).await? {
        CallOutcome::Completed { headers, body } => {
            let status = headers.as_ref().and_then(|h| h.status());
            let ack: serde_json::Value = serde_json::from_slice(&body)
                .unwrap_or_else(|_| serde_json::json!({"raw": String::from_utf8_lossy(&body)}));
            info!(?status, response = %ack, "response received");
        }
        CallOutcome::TimedOut => {
            info!("no response within the window");
        }
    }

    server.close();
    client.close();
    Ok(())
}
