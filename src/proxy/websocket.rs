//! WebSocket pass-through.
//!
//! After 101 Switching Protocols the proxy becomes a bidirectional message
//! pipe between client and backend. No retries, no header rewriting past
//! the upgrade; the inflight slot is held for the connection's lifetime.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as TgMessage};
use tracing::{error, info, warn};
use url::Url;

use crate::service::runtime::InflightGuard;

/// Whether a request asks for a WebSocket upgrade.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Complete the client upgrade and bridge to the backend.
///
/// The guard rides in the upgrade closure so the backend's inflight count
/// covers the whole connection.
pub fn handle_upgrade(
    ws: WebSocketUpgrade,
    backend_url: Url,
    request_id: String,
    guard: InflightGuard,
) -> Response {
    info!(backend = %backend_url, request_id = %request_id, "handling websocket upgrade");

    ws.on_upgrade(move |socket| async move {
        let _guard = guard;
        proxy_ws(socket, backend_url).await;
    })
}

async fn proxy_ws(client_ws: WebSocket, backend_url: Url) {
    let mut ws_backend_url = backend_url.clone();
    let scheme = match backend_url.scheme() {
        "http" => "ws",
        "https" => "wss",
        s => s,
    };
    if ws_backend_url.set_scheme(scheme).is_err() {
        error!("failed to set websocket scheme: {}", scheme);
        return;
    }

    match connect_async(ws_backend_url.as_str()).await {
        Ok((backend_ws, _)) => {
            let (mut b_sink, mut b_stream) = backend_ws.split();
            let (mut c_sink, mut c_stream) = client_ws.split();

            let client_to_backend = async {
                while let Some(Ok(msg)) = c_stream.next().await {
                    let b_msg = match msg {
                        Message::Text(t) => TgMessage::Text(t.to_string().into()),
                        Message::Binary(b) => TgMessage::Binary(b.into()),
                        Message::Ping(p) => TgMessage::Ping(p.into()),
                        Message::Pong(p) => TgMessage::Pong(p.into()),
                        Message::Close(c) => TgMessage::Close(c.map(tg_close_frame)),
                    };
                    if let Err(e) = b_sink.send(b_msg).await {
                        warn!("error forwarding to backend: {}", e);
                        break;
                    }
                }
            };

            let backend_to_client = async {
                while let Some(Ok(msg)) = b_stream.next().await {
                    let c_msg = match msg {
                        TgMessage::Text(t) => Message::Text(t.to_string().into()),
                        TgMessage::Binary(b) => Message::Binary(b.into()),
                        TgMessage::Ping(p) => Message::Ping(p.into()),
                        TgMessage::Pong(p) => Message::Pong(p.into()),
                        TgMessage::Close(c) => Message::Close(c.map(ax_close_frame)),
                        _ => continue,
                    };
                    if let Err(e) = c_sink.send(c_msg).await {
                        warn!("error forwarding to client: {}", e);
                        break;
                    }
                }
            };

            tokio::select! {
                _ = client_to_backend => {},
                _ = backend_to_client => {},
            }
            info!(backend = %backend_url, "websocket connection closed");
        }
        Err(e) => {
            error!(backend = %backend_url, error = %e, "failed to connect to backend websocket");
        }
    }
}

fn tg_close_frame(cf: axum::extract::ws::CloseFrame) -> tungstenite::protocol::CloseFrame {
    tungstenite::protocol::CloseFrame {
        code: cf.code.into(),
        reason: cf.reason.to_string().into(),
    }
}

fn ax_close_frame(cf: tungstenite::protocol::CloseFrame) -> axum::extract::ws::CloseFrame {
    axum::extract::ws::CloseFrame {
        code: cf.code.into(),
        reason: cf.reason.to_string().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn upgrade_detection_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        assert!(!is_upgrade(&headers));
        headers.insert("upgrade", HeaderValue::from_static("WebSocket"));
        assert!(is_upgrade(&headers));
        headers.insert("upgrade", HeaderValue::from_static("h2c"));
        assert!(!is_upgrade(&headers));
    }
}
