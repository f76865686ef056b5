use futures::{future, SinkExt, StreamExt};
use perolink_core::message::MAX_ENVELOPE_SIZE;
use perolink_core::relay::{serve_connection, AuthPolicy, Frame, NodeSummary, Relay, RelayStats};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use warp::ws::{Message, WebSocket};
use warp::Filter;

// ============================================================================
// API RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    auth_policy: AuthPolicy,
    stats: RelayStats,
    nodes: Vec<NodeSummary>,
}

// ============================================================================
// SERVER START
// ============================================================================

/// Serve `/ws` and `/api/status` until the process exits
pub async fn serve(addr: SocketAddr, relay: Arc<Relay>, start_time: Instant) {
    let relay_filter = warp::any().map({
        let relay = relay.clone();
        move || relay.clone()
    });

    // 1. WebSocket at /ws
    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(relay_filter.clone())
        .map(|ws: warp::ws::Ws, remote: Option<SocketAddr>, relay: Arc<Relay>| {
            let peer = remote
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ws.max_message_size(MAX_ENVELOPE_SIZE)
                .on_upgrade(move |socket| handle_socket(socket, relay, peer))
        })
        .boxed();

    // 2. Status API
    let status_route = warp::path!("api" / "status")
        .and(warp::get())
        .and(relay_filter)
        .map(move |relay: Arc<Relay>| warp::reply::json(&status(&relay, start_time)))
        .boxed();

    // Any origin may connect
    let cors = warp::cors().allow_any_origin();
    let routes = ws_route.or(status_route).with(cors).boxed();

    tracing::info!("PeroLink gateway listening on {}", addr);
    warp::serve(routes).run(addr).await;
}

fn status(relay: &Relay, start_time: Instant) -> StatusResponse {
    StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        auth_policy: relay.config().auth_policy,
        stats: relay.get_stats(),
        nodes: relay.registry().summaries(),
    }
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

async fn handle_socket(ws: WebSocket, relay: Arc<Relay>, peer: String) {
    let (ws_tx, ws_rx) = ws.split();

    let inbound = ws_rx.map(|result| result.map(frame_from_ws));
    let outbound = ws_tx.with(|frame: Frame| future::ready(Ok::<_, warp::Error>(frame_to_ws(frame))));

    serve_connection(relay, peer, inbound, outbound).await;
}

fn frame_from_ws(msg: Message) -> Frame {
    if msg.is_binary() {
        Frame::Binary(msg.as_bytes().to_vec())
    } else if msg.is_text() {
        Frame::Text(msg.to_str().unwrap_or_default().to_string())
    } else if msg.is_close() {
        Frame::Close
    } else {
        Frame::Control
    }
}

fn frame_to_ws(frame: Frame) -> Message {
    match frame {
        Frame::Binary(bytes) => Message::binary(bytes),
        Frame::Text(text) => Message::text(text),
        Frame::Control => Message::ping(Vec::new()),
        Frame::Close => Message::close(),
    }
}
