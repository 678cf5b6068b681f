//! WebSocket upgrade and per-connection handler.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::stream::StreamExt;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

use crate::proto::{parse_request, Reply, Request};
use crate::service::TelemetryService;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let clients = state.client_count.fetch_add(1, Ordering::Relaxed) + 1;
    info!(clients, "client connected");

    // Ensure we decrement on disconnect (drop).
    struct ClientGuard(AppState);
    impl Drop for ClientGuard {
        fn drop(&mut self) {
            let left = self.0.client_count.fetch_sub(1, Ordering::Relaxed) - 1;
            info!(clients = left, "client disconnected");
        }
    }
    let _guard = ClientGuard(state.clone());

    while let Some(Ok(msg)) = socket.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = match parse_request(&text) {
            Ok(req) => dispatch(&state.service, req).await,
            Err(e) => {
                debug!(error = %e, "rejected request");
                Reply::bad_request(e)
            }
        };
        let js = match serde_json::to_string(&reply) {
            Ok(js) => js,
            Err(e) => {
                debug!(error = %e, "reply serialization failed");
                continue;
            }
        };
        if socket.send(Message::Text(js)).await.is_err() {
            break;
        }
    }
}

/// Run one request against the service.
pub async fn dispatch(service: &TelemetryService, req: Request) -> Reply {
    let op = req.op();
    match req {
        Request::GetStats => match service.get_stats().await {
            Ok(s) => Reply::ok(op, &s),
            Err(e) => Reply::err(op, &e),
        },
        Request::GetProcesses => match service.get_processes().await {
            Ok(list) => Reply::ok(op, &list),
            Err(e) => Reply::err(op, &e),
        },
        Request::GetTopProcesses { limit } => match service.get_top_processes(limit).await {
            Ok(list) => Reply::ok(op, &list),
            Err(e) => Reply::err(op, &e),
        },
        Request::KillProcess { pid, expected_name } => {
            match service.kill_process(pid, expected_name.as_deref()).await {
                Ok(msg) => Reply::ok(op, &msg),
                Err(e) => Reply::err(op, &e),
            }
        }
    }
}
