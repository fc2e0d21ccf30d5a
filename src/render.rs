//! HTML projection of the transcript.
//!
//! Every function here is pure: it reads widget data and returns markup.
//! The markup follows the widget's DOM contract (`chat-history`,
//! `user-input`, `send-btn` and the `message` / `avatar` / `content` /
//! `timestamp` classes). Message text is always escaped.

use crate::widget::{
    Dispatch, Entry, LOADING_TEXT, LoadingId, LoadingIndicator, Message, Transcript,
    message_dom_id,
};

/// Name of the SSE event carrying HTML fragments for the page.
pub const FRAGMENT_EVENT: &str = "widget";

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render one message node.
pub fn render_message(message: &Message) -> String {
    let sender = message.sender;
    format!(
        r#"<div class="message {class}-message" id="{id}">
    <div class="avatar"><i class="fas {icon}"></i></div>
    <div class="content">
        <p>{text}</p>
        <span class="timestamp">{timestamp}</span>
    </div>
</div>
"#,
        id = message.dom_id(),
        class = sender.as_str(),
        icon = sender.icon(),
        text = escape_html(&message.text),
        timestamp = escape_html(&message.timestamp),
    )
}

/// Render a loading indicator node.
pub fn render_loading(indicator: &LoadingIndicator) -> String {
    format!(
        r#"<div class="message system-message" id="{id}">
    <div class="avatar"><i class="fas fa-atom fa-spin"></i></div>
    <div class="content">
        <p>{LOADING_TEXT}</p>
    </div>
</div>
"#,
        id = escape_html(indicator.id.as_str()),
    )
}

/// Render one transcript entry.
pub fn render_entry(entry: &Entry) -> String {
    match entry {
        Entry::Message(message) => render_message(message),
        Entry::Loading(indicator) => render_loading(indicator),
    }
}

/// Render every entry of the transcript in order.
pub fn render_history(transcript: &Transcript) -> String {
    transcript.entries().iter().map(render_entry).collect()
}

/// Replace the whole history container with the transcript.
///
/// Sent first on every event stream so the page catches up with changes it
/// missed while disconnected.
pub fn render_resync(transcript: &Transcript) -> String {
    format!(
        "<div id=\"chat-history\" hx-swap-oob=\"innerHTML\">\n{}</div>\n",
        render_history(transcript)
    )
}

/// Out-of-band deletes for evicted messages.
pub fn render_evictions(evicted: &[u64]) -> String {
    evicted
        .iter()
        .map(|&id| {
            format!(
                "<div id=\"{}\" hx-swap-oob=\"delete\"></div>\n",
                message_dom_id(id)
            )
        })
        .collect()
}

/// Fragment appended to the history when a send is accepted.
pub fn render_dispatch(dispatch: &Dispatch) -> String {
    let mut out = render_evictions(&dispatch.evicted);
    out.push_str(&render_message(&dispatch.message));
    out.push_str(&render_loading(&LoadingIndicator {
        id: dispatch.indicator.clone(),
    }));
    out
}

/// Out-of-band fragment for a settled request: drop the indicator, append
/// the reply.
pub fn render_settled(indicator: &LoadingId, message: &Message, evicted: &[u64]) -> String {
    format!(
        "<div id=\"{id}\" hx-swap-oob=\"delete\"></div>\n{evictions}<div hx-swap-oob=\"beforeend:#chat-history\">\n{body}</div>\n",
        id = escape_html(indicator.as_str()),
        evictions = render_evictions(evicted),
        body = render_message(message),
    )
}

/// Generate the HTML shell for a page.
pub fn html_shell(title: &str, content: &str) -> String {
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>

    <!-- HTMX and Extensions (local) -->
    <script src="/static/vendor/htmx-2.0.8.min.js"></script>
    <script src="/static/vendor/htmx-sse.js"></script>
    <link rel="stylesheet" href="/static/vendor/fontawesome/css/all.min.css">
    <link rel="stylesheet" href="/static/style.css">
    <script>
        function scrollChatHistory() {{
            const history = document.getElementById('chat-history');
            history.scrollTop = history.scrollHeight;
        }}
    </script>
</head>
<body>
{content}
</body>
</html>
"#
    )
}

/// Widget markup for one session.
///
/// The history container is pre-filled from the transcript; later changes
/// arrive either as the response to the send form or over the session's
/// SSE stream.
pub fn render_widget(session_id: &str, transcript: &Transcript) -> String {
    let session_id = escape_html(session_id);
    format!(
        r##"<main class="chat-container" hx-ext="sse" sse-connect="/sessions/{session_id}/events">
    <div id="chat-history" class="chat-history">
{history}    </div>
    <div id="chat-events" hidden sse-swap="{FRAGMENT_EVENT}" hx-swap="none" hx-on::sse-message="scrollChatHistory()"></div>
    <form id="chat-form" class="input-area"
          hx-post="/sessions/{session_id}/send"
          hx-target="#chat-history"
          hx-swap="beforeend"
          hx-on:chat-sent="this.reset(); scrollChatHistory()">
        <input type="text" id="user-input" name="message" placeholder="Type a message..." autocomplete="off" autofocus>
        <button type="submit" id="send-btn"><i class="fas fa-paper-plane"></i></button>
    </form>
</main>"##,
        history = render_history(transcript),
    )
}

/// Full page for a session.
pub fn render_page(title: &str, session_id: &str, transcript: &Transcript) -> String {
    html_shell(title, &render_widget(session_id, transcript))
}
