//! Transcript entry types.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use super::clock::Clock;

/// Default timestamp layout (`hour:minute`).
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M";

/// Text shown when a request fails before a reply could be read.
pub const FALLBACK_REPLY: &str = "System Error: Connection to Core Failed.";

/// Placeholder text shown while a request is pending.
pub const LOADING_TEXT: &str = "Processing Neural Pathways...";

/// Origin of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Local input typed into the widget.
    User,
    /// Remote reply or error fallback.
    System,
}

impl Sender {
    /// Lowercase name, used as the `{sender}-message` class prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }

    /// Avatar icon class for this sender.
    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            Self::User => "fa-user",
            Self::System => "fa-robot",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered chat message.
///
/// Messages are created once and never mutated after they enter the
/// transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the transcript, assigned on append; `0` until then.
    #[serde(default)]
    pub id: u64,
    /// Message body as displayed.
    pub text: String,
    /// Who produced the message.
    pub sender: Sender,
    /// Local wall-clock time at creation, already formatted.
    pub timestamp: String,
}

impl Message {
    /// Create a message stamped with the clock's current local time.
    pub fn new(
        text: impl Into<String>,
        sender: Sender,
        clock: &dyn Clock,
        time_format: &str,
    ) -> Self {
        Self {
            id: 0,
            text: text.into(),
            sender,
            timestamp: clock.now().format(time_format).to_string(),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>, clock: &dyn Clock, time_format: &str) -> Self {
        Self::new(text, Sender::User, clock, time_format)
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>, clock: &dyn Clock, time_format: &str) -> Self {
        Self::new(text, Sender::System, clock, time_format)
    }

    /// DOM id of the rendered node (`msg-<id>`).
    #[must_use]
    pub fn dom_id(&self) -> String {
        message_dom_id(self.id)
    }
}

/// DOM id for the message with transcript id `id`.
#[must_use]
pub fn message_dom_id(id: u64) -> String {
    format!("msg-{id}")
}

/// Identifier of a loading indicator (`loading-<epoch millis>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadingId(String);

impl LoadingId {
    /// Build the identifier for the given epoch milliseconds.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(format!("loading-{millis}"))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Placeholder entry shown between request issuance and settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingIndicator {
    /// Identifier used to remove the indicator later. Never displayed.
    pub id: LoadingId,
}

/// Hands out loading identifiers that stay unique within one widget.
///
/// Two sends inside the same millisecond would otherwise collide, so the
/// generator never returns a value at or below the last one it issued.
#[derive(Debug)]
pub struct LoadingIdGenerator {
    last: AtomicI64,
}

impl Default for LoadingIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadingIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(i64::MIN),
        }
    }

    /// Next identifier for a request issued at `now_millis`.
    pub fn next(&self, now_millis: i64) -> LoadingId {
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if now_millis > last {
                now_millis
            } else {
                last.saturating_add(1)
            };
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return LoadingId::from_millis(candidate),
                Err(current) => last = current,
            }
        }
    }
}

/// One row of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    /// A user or system message.
    Message(Message),
    /// A pending-request placeholder.
    Loading(LoadingIndicator),
}

impl Entry {
    /// The message, if this entry is one.
    #[must_use]
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Loading(_) => None,
        }
    }

    /// The loading identifier, if this entry is an indicator.
    #[must_use]
    pub fn loading_id(&self) -> Option<&LoadingId> {
        match self {
            Self::Message(_) => None,
            Self::Loading(indicator) => Some(&indicator.id),
        }
    }
}
