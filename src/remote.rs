//! Client for the remote chat endpoint.
//!
//! The endpoint takes `{"query": "..."}` and answers `{"response": "..."}`.
//! Any body that parses as JSON counts as a reply, whatever the HTTP status;
//! only transport failures and unparseable bodies are errors.

use std::fmt::Debug;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Errors raised while talking to the remote endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Body parsed but cannot be read as a reply.
    #[error("Invalid reply body: {0}")]
    InvalidBody(String),
}

/// Request body sent to the endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatQuery<'a> {
    /// Trimmed user text.
    pub query: &'a str,
}

/// Reply read from the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    /// The `response` field, `None` when the body lacks one.
    pub response: Option<Value>,
}

impl ChatReply {
    /// Read a reply out of a parsed body.
    ///
    /// A `null` body has no fields to read and is rejected; any other JSON
    /// value is accepted, with `response` absent unless the body is an
    /// object carrying it.
    pub fn from_body(body: Value) -> Result<Self, TransportError> {
        match body {
            Value::Null => Err(TransportError::InvalidBody(
                "cannot read `response` from null".to_string(),
            )),
            Value::Object(mut fields) => Ok(Self {
                response: fields.remove("response"),
            }),
            _ => Ok(Self { response: None }),
        }
    }

    /// Text to display for this reply.
    ///
    /// The field is shown however it arrived: strings verbatim, a missing
    /// field as `undefined`, other JSON values in their display form.
    #[must_use]
    pub fn text(&self) -> String {
        self.response
            .as_ref()
            .map_or_else(|| "undefined".to_string(), display_value)
    }
}

impl From<&str> for ChatReply {
    fn from(text: &str) -> Self {
        Self {
            response: Some(Value::String(text.to_string())),
        }
    }
}

/// Display form of a JSON value when interpolated into text.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => display_value(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Seam between the widget and the remote endpoint.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync + Debug {
    /// Send one query and wait for its reply.
    async fn send(&self, query: &str) -> Result<ChatReply, TransportError>;
}

/// HTTP transport backed by `reqwest`.
///
/// # Example
///
/// ```rust,no_run
/// use chat_widget::remote::{ChatTransport, HttpChatClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpChatClient::new("http://127.0.0.1:8000/chat")?;
/// let reply = client.send("Hello").await?;
/// println!("{}", reply.text());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpChatClient {
    endpoint: Url,
    http: reqwest::Client,
}

impl HttpChatClient {
    /// Create a client for the given endpoint URL.
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self, TransportError> {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    /// Create a client with a custom reqwest client.
    pub fn with_client(
        endpoint: impl AsRef<str>,
        http: reqwest::Client,
    ) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint.as_ref())?;
        Ok(Self { endpoint, http })
    }

    /// The endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpChatClient {
    async fn send(&self, query: &str) -> Result<ChatReply, TransportError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&ChatQuery { query })
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes)?;

        if !status.is_success() {
            tracing::debug!(
                name: "remote.reply.status",
                status = %status,
                "Endpoint answered with a non-success status; reading body anyway"
            );
        }

        ChatReply::from_body(body)
    }
}
