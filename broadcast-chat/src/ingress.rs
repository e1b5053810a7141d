//! HTTP ingress: `GET /chat/<domain>/<sender>/<body...>` posts one message.
//!
//! Requests never register with the hub. Each one becomes a single
//! `ChatMessage` from an ephemeral request handle and is broadcast to every
//! connected stream client. The domain segment is echoed back in the reply
//! but otherwise ignored: there is only one room.

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{client::ClientHandle, hub::HubHandle};

pub const PREFIX: &str = "chat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRequest {
    pub domain: String,
    pub sender: String,
    pub body: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngressError {
    #[error("path must look like /chat/<domain>/<sender>/<message>")]
    Malformed,
    #[error("sender segment is empty")]
    EmptySender,
    #[error("message segment is empty")]
    EmptyBody,
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        (StatusCode::NOT_FOUND, "404 page not found\n").into_response()
    }
}

impl IngressRequest {
    /// Parses a decoded request path such as `/chat/general/alice/hello world`.
    ///
    /// Everything after the sender segment is the body, slashes included.
    pub fn parse(path: &str) -> Result<Self, IngressError> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 5 || !parts[0].is_empty() || parts[1] != PREFIX {
            return Err(IngressError::Malformed);
        }
        if parts[3].is_empty() {
            return Err(IngressError::EmptySender);
        }
        if parts[4].is_empty() {
            return Err(IngressError::EmptyBody);
        }

        Ok(Self {
            domain: parts[2].to_string(),
            sender: parts[3].to_string(),
            body: parts[4..].join("/"),
        })
    }

    pub fn acknowledgement(&self) -> String {
        format!(
            "sending message for:user:{}:to chan:{}:\n",
            self.sender, self.domain
        )
    }
}

/// Hands a validated request to the hub and returns the reply text.
pub fn submit(hub: &HubHandle, request: &IngressRequest) -> String {
    let handle = ClientHandle::request(request.sender.as_str());
    info!(
        domain = %request.domain,
        sender = handle.nickname(),
        kind = %handle.kind(),
        "api message"
    );
    hub.submit(handle.message(&request.body));
    request.acknowledgement()
}

pub fn router(hub: HubHandle) -> Router {
    Router::new()
        .route(
            &format!("/{PREFIX}/*rest"),
            get(post_message).post(post_message),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

pub async fn serve(listener: TcpListener, hub: HubHandle) -> anyhow::Result<()> {
    axum::serve(listener, router(hub)).await?;
    Ok(())
}

/// Anything the chat route does not match, `/chat` and `/chat/` included.
async fn not_found() -> IngressError {
    IngressError::Malformed
}

async fn post_message(
    State(hub): State<HubHandle>,
    Path(rest): Path<String>,
) -> Result<String, IngressError> {
    let rest = rest.strip_prefix('/').unwrap_or(&rest);
    let path = format!("/{PREFIX}/{rest}");
    info!(%path, "api call");

    let request = IngressRequest::parse(&path)?;
    Ok(submit(&hub, &request))
}
