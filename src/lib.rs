//! Chat widget host.
//!
//! Captures user text, echoes it into a transcript, forwards it to a remote
//! chat endpoint and shows the reply. A loading indicator stands in for each
//! reply while its request is pending.
//!
//! # Architecture
//!
//! - **Widget**: the send/render cycle over an in-memory transcript
//! - **Remote**: `reqwest` client for the `POST /chat` endpoint
//! - **Render**: pure HTML projection of the transcript (HTMX + SSE page)
//! - **Server**: Axum host, one widget per page load
//!
//! # Modules
//!
//! - [`widget`]: widget state, send cycle and change events
//! - [`remote`]: remote endpoint transport
//! - [`render`]: HTML projection
//! - [`session`]: per-page-load widget storage
//! - [`server`]: HTTP routes and startup
//! - [`config`]: layered configuration

pub mod config;
pub mod remote;
pub mod render;
pub mod server;
pub mod session;
pub mod widget;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::session::SessionStore;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// One widget session per page load.
    pub sessions: SessionStore,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}
