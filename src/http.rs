//! Read-only HTTP status page: a projection of the connected-node set,
//! nothing more. Binds to `port + 1`; retries on `127.0.0.1` once before
//! giving up.

use crate::net::Network;
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    network: Arc<Network>,
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let nodes = state.network.connected_nodes().await;
    let items: String = nodes.iter().map(|n| format!("<li>{n}</li>")).collect();
    Html(format!("<html><body><h1>meshdb</h1><ul>{items}</ul></body></html>"))
}

#[derive(Deserialize)]
struct ConnectionsQuery {
    json: Option<bool>,
}

/// `GET /connections` renders the same connected-node list as `/` in
/// plain HTML; `GET /connections?json=true` returns it as JSON instead.
async fn connections(State(state): State<AppState>, Query(query): Query<ConnectionsQuery>) -> impl IntoResponse {
    let names: Vec<String> = state.network.connected_nodes().await.iter().map(|n| n.to_string()).collect();

    if query.json.unwrap_or(false) {
        Json(serde_json::json!({ "connections": names })).into_response()
    } else {
        let items: String = names.iter().map(|n| format!("<li>{n}</li>")).collect();
        Html(format!("<html><body><h1>connections</h1><ul>{items}</ul></body></html>")).into_response()
    }
}

/// Runs the status page until its listener dies. Never returns an error to
/// the caller — a bind failure on both addresses just disables the page.
pub async fn serve(network: Arc<Network>, node_port: u16) {
    let page_port = node_port.wrapping_add(1);
    let app = Router::new()
        .route("/", get(index))
        .route("/connections", get(connections))
        .with_state(AppState { network });

    let wildcard = SocketAddr::from(([0, 0, 0, 0], page_port));
    let listener = match tokio::net::TcpListener::bind(wildcard).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("status page failed to bind {wildcard}: {e}; retrying on localhost");
            let local = SocketAddr::from(([127, 0, 0, 1], page_port));
            match tokio::net::TcpListener::bind(local).await {
                Ok(listener) => listener,
                Err(e2) => {
                    warn!("status page failed to bind {local} too: {e2}; disabling web interface");
                    return;
                }
            }
        }
    };

    info!("status page listening on {}", listener.local_addr().map(|a| a.to_string()).unwrap_or_default());
    if let Err(e) = axum::serve(listener, app).await {
        warn!("status page server error: {e}");
    }
}
