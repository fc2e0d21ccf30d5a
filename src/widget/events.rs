//! Widget change notifications.
//!
//! Every transcript change caused by a send is published as a
//! [`WidgetEvent`]. The HTTP layer forwards them to the browser over SSE.
//!
//! # Example
//!
//! ```rust
//! use chat_widget::widget::{LoadingId, WidgetEvent, sse_event};
//!
//! let event = WidgetEvent::RequestFailed {
//!     indicator: LoadingId::from_millis(1),
//!     error: "connection refused".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.starts_with("event: request.failed\n"));
//! ```

use serde::{Deserialize, Serialize};

use super::message::{LoadingId, Message};

/// Events published by a [`ChatWidget`](super::ChatWidget).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WidgetEvent {
    /// A send was accepted: the user message and its indicator are shown.
    #[serde(rename = "send.dispatched")]
    Dispatched {
        /// The echoed user message.
        message: Message,
        /// Indicator tracking the request.
        indicator: LoadingId,
        /// Messages evicted to make room for the echo.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        evicted: Vec<u64>,
    },

    /// A request settled: the indicator is gone and the reply is shown.
    #[serde(rename = "send.settled")]
    Settled {
        /// Indicator that was removed.
        indicator: LoadingId,
        /// The system message appended in its place.
        message: Message,
        /// Messages evicted to make room for the reply.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        evicted: Vec<u64>,
    },

    /// A request failed. Always followed by a [`WidgetEvent::Settled`]
    /// carrying the fallback message.
    #[serde(rename = "request.failed")]
    RequestFailed {
        /// Indicator of the failed request.
        indicator: LoadingId,
        /// Error description, for diagnostics only.
        error: String,
    },
}

/// Get the SSE event name for a [`WidgetEvent`].
pub fn event_name(evt: &WidgetEvent) -> &'static str {
    match evt {
        WidgetEvent::Dispatched { .. } => "send.dispatched",
        WidgetEvent::Settled { .. } => "send.settled",
        WidgetEvent::RequestFailed { .. } => "request.failed",
    }
}

/// Convert a [`WidgetEvent`] to an SSE-formatted string with a JSON payload.
pub fn sse_event(evt: &WidgetEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    format!("event: {}\ndata: {json}\n\n", event_name(evt))
}

/// Format an arbitrary multi-line payload as one SSE event.
///
/// Every line of `data` gets its own `data:` field so that HTML fragments
/// survive the framing.
pub fn sse_frame(name: &str, data: &str) -> String {
    let mut frame = format!("event: {name}\n");
    for line in data.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    if data.is_empty() {
        frame.push_str("data: \n");
    }
    frame.push('\n');
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::message::Sender;

    fn system(text: &str) -> Message {
        Message {
            id: 2,
            text: text.to_string(),
            sender: Sender::System,
            timestamp: "10:00".to_string(),
        }
    }

    #[test]
    fn test_settled_serialization() {
        let event = WidgetEvent::Settled {
            indicator: LoadingId::from_millis(5),
            message: system("Hi there"),
            evicted: vec![],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("send.settled"));
        assert!(json.contains("loading-5"));
        assert!(json.contains("Hi there"));
    }

    #[test]
    fn test_sse_event_format() {
        let event = WidgetEvent::Settled {
            indicator: LoadingId::from_millis(5),
            message: system("x"),
            evicted: vec![1],
        };
        let sse = sse_event(&event);
        assert!(sse.starts_with("event: send.settled\n"));
        assert!(sse.contains("data: "));
        assert!(sse.ends_with("\n\n"));
        assert!(sse.contains(r#""evicted":[1]"#));
    }

    #[test]
    fn test_sse_frame_splits_lines() {
        let frame = sse_frame("widget", "<div>\n<p>hi</p>\n</div>");
        assert_eq!(
            frame,
            "event: widget\ndata: <div>\ndata: <p>hi</p>\ndata: </div>\n\n"
        );
    }
}
