use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Form, Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::AppState;
use crate::config::AppConfig;
use crate::remote::HttpChatClient;
use crate::render;
use crate::session::{Session, SessionStore, WidgetFactory};
use crate::widget::{
    LoadingId, Message, ScrollState, SendOutcome, Transcript, WidgetEvent, sse_event, sse_frame,
};

/// How often idle sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Event raised on the send form once a dispatch fragment has settled.
const SENT_TRIGGER: &str = "chat-sent";

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let transport = Arc::new(HttpChatClient::new(&config.endpoint.url)?);
    info!(
        name: "endpoint.config.loaded",
        url = %transport.endpoint(),
        "Remote chat endpoint configured"
    );

    let sessions = SessionStore::new(WidgetFactory::new(transport, config.widget.options()));

    let ttl = config.widget.session_ttl();
    let sweeper = {
        let sessions = sessions.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = sessions.cleanup_expired_with_timeout(ttl);
                if removed > 0 {
                    info!(
                        name: "session.swept",
                        removed,
                        remaining = sessions.len(),
                        "Expired sessions removed"
                    );
                }
            }
        })
    };

    let state = AppState {
        sessions: sessions.clone(),
        config: Arc::clone(&config),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    sessions.shutdown_all();
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        // HTML pages and fragments
        .route("/", get(index_handler))
        .route("/sessions/{id}/send", post(send_handler))
        .route("/sessions/{id}/history", get(history_handler))
        .route("/sessions/{id}/events", get(events_handler))
        // JSON API
        .route("/api/sessions/{id}", get(api_get_session).delete(api_delete_session))
        .route("/api/sessions/{id}/send", post(api_send))
        .route("/api/sessions/{id}/messages", get(api_get_messages))
        .route("/health", get(|| async { "ok" }))
        // Static assets
        .nest_service("/static", static_dir)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(name: "server.shutdown", "Shutdown signal received");
}

fn session_or_404(state: &AppState, id: &str) -> Result<Session, StatusCode> {
    state.sessions.get(id).ok_or_else(|| {
        warn!(session_id = %id, "Session not found");
        StatusCode::NOT_FOUND
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET / - Widget page for a fresh session.
async fn index_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.sessions.create();
    info!(name: "session.created", session_id = %session.id(), "Widget session created");
    Html(render::render_page(
        &state.config.server.title,
        session.id(),
        &session.widget().transcript(),
    ))
}

/// Form body posted by the send form.
#[derive(Debug, Deserialize)]
struct SendForm {
    #[serde(default)]
    message: String,
}

/// POST /sessions/:id/send - Send from the form, answer with an HTML fragment.
async fn send_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<SendForm>,
) -> Result<Response, StatusCode> {
    let session = session_or_404(&state, &id)?;

    let response = match session.widget().send(form.message) {
        SendOutcome::Sent(dispatch) => (
            [("HX-Trigger-After-Settle", SENT_TRIGGER)],
            Html(render::render_dispatch(&dispatch)),
        )
            .into_response(),
        SendOutcome::Ignored => StatusCode::NO_CONTENT.into_response(),
        SendOutcome::Busy => StatusCode::CONFLICT.into_response(),
    };
    Ok(response)
}

/// GET /sessions/:id/history - Rendered history fragment.
async fn history_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, StatusCode> {
    let session = session_or_404(&state, &id)?;
    Ok(Html(render::render_history(&session.widget().transcript())))
}

/// GET /sessions/:id/events - SSE stream of widget changes.
///
/// The stream opens with a fragment replacing the whole history, so a page
/// that connects late or reconnects shows every settlement it missed. The
/// same happens after the subscriber lags behind. Settlements are then sent
/// twice: as an HTML fragment under the [`render::FRAGMENT_EVENT`] name for
/// the page, and as a JSON event for any other listener.
async fn events_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session = match session_or_404(&state, &id) {
        Ok(s) => s,
        Err(status) => return status.into_response(),
    };

    let weak = session.widget().downgrade();
    let (mut rx, snapshot) = session.widget().subscribe_with_snapshot();
    drop(session);

    info!(name: "session.events.subscribed", session_id = %id, "Starting SSE stream");

    let sse_stream = async_stream::stream! {
        yield Ok::<String, Infallible>(resync_frame(&snapshot));
        drop(snapshot);

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let WidgetEvent::Settled { indicator, message, evicted } = &event {
                        let fragment = render::render_settled(indicator, message, evicted);
                        yield Ok::<String, Infallible>(
                            sse_frame(render::FRAGMENT_EVENT, &fragment)
                        );
                    }
                    yield Ok::<String, Infallible>(sse_event(&event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session_id = %id, skipped, "SSE subscriber lagged; resyncing history");
                    let Some(widget) = weak.upgrade() else {
                        break;
                    };
                    let (fresh, snapshot) = widget.subscribe_with_snapshot();
                    drop(widget);
                    rx = fresh;
                    yield Ok::<String, Infallible>(resync_frame(&snapshot));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    build_sse_response(Body::from_stream(sse_stream))
}

fn resync_frame(transcript: &Transcript) -> String {
    sse_frame(render::FRAGMENT_EVENT, &render::render_resync(transcript))
}

fn build_sse_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        [("X-Accel-Buffering", "no")],
        body,
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for the JSON send API.
#[derive(Debug, Deserialize)]
struct SendRequest {
    message: String,
}

/// Session info for the JSON API.
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    message_count: usize,
    pending: Vec<LoadingId>,
    scroll: ScrollState,
    age_secs: u64,
}

/// GET /api/sessions/:id - Session details.
async fn api_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, StatusCode> {
    let session = session_or_404(&state, &id)?;
    let widget = session.widget();
    let transcript = widget.transcript();
    Ok(Json(SessionInfo {
        id: session.id().to_string(),
        message_count: transcript.messages().count(),
        pending: widget.pending(),
        scroll: transcript.scroll(),
        age_secs: session.age().as_secs(),
    }))
}

/// DELETE /api/sessions/:id - Drop a session.
async fn api_delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// POST /api/sessions/:id/send - Send and report the outcome as JSON.
async fn api_send(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendOutcome>, StatusCode> {
    let session = session_or_404(&state, &id)?;
    Ok(Json(session.widget().send(req.message)))
}

/// GET /api/sessions/:id/messages - Transcript messages.
async fn api_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let session = session_or_404(&state, &id)?;
    Ok(Json(session.widget().transcript().messages().cloned().collect()))
}
