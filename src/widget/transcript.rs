//! In-memory conversation transcript.
//!
//! The transcript is the source of truth for what the history container
//! shows. Rendering reads it, nothing writes back from the rendered view.

use serde::Serialize;

use super::message::{Entry, LoadingId, LoadingIndicator, Message};

/// Scroll position of the history view.
///
/// Each entry counts as one row of scrollable height, so the maximum offset
/// is the number of entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrollState {
    /// Current offset from the top.
    pub offset: usize,
    /// Largest reachable offset.
    pub max: usize,
}

impl ScrollState {
    /// Whether the view sits at its maximum offset.
    #[must_use]
    pub fn at_bottom(&self) -> bool {
        self.offset == self.max
    }
}

/// Result of appending a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    /// The message as stored, with its id assigned.
    pub message: Message,
    /// Ids of messages evicted to stay within the history limit.
    pub evicted: Vec<u64>,
}

/// Ordered, append-only list of transcript entries.
///
/// Loading indicators are the only entries that can be removed.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    scroll: ScrollState,
    history_limit: Option<usize>,
    last_id: u64,
}

impl Transcript {
    /// Create an empty, unbounded transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transcript that keeps at most `limit` messages.
    ///
    /// The oldest message is evicted when the limit is exceeded. Loading
    /// indicators do not count towards the limit and are never evicted.
    #[must_use]
    pub fn with_history_limit(limit: Option<usize>) -> Self {
        Self {
            history_limit: limit,
            ..Self::default()
        }
    }

    /// Append a message, assigning it the next message id.
    pub fn push_message(&mut self, mut message: Message) -> Appended {
        self.last_id += 1;
        message.id = self.last_id;
        self.entries.push(Entry::Message(message.clone()));
        let evicted = self.evict_overflow();
        self.update_extent();
        Appended { message, evicted }
    }

    /// Append a loading indicator.
    pub fn push_loading(&mut self, id: LoadingId) {
        self.entries.push(Entry::Loading(LoadingIndicator { id }));
        self.update_extent();
    }

    /// Remove the loading indicator with `id`.
    ///
    /// Returns `false` when no such indicator is present.
    pub fn remove_loading(&mut self, id: &LoadingId) -> bool {
        let Some(pos) = self
            .entries
            .iter()
            .position(|entry| entry.loading_id() == Some(id))
        else {
            return false;
        };
        self.entries.remove(pos);
        self.update_extent();
        true
    }

    /// All entries in display order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Messages in display order, skipping loading indicators.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(Entry::as_message)
    }

    /// Identifiers of the indicators still shown.
    pub fn loading_ids(&self) -> impl Iterator<Item = &LoadingId> {
        self.entries.iter().filter_map(Entry::loading_id)
    }

    /// Whether an indicator with `id` is shown.
    #[must_use]
    pub fn has_loading(&self, id: &LoadingId) -> bool {
        self.loading_ids().any(|shown| shown == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current scroll state.
    #[must_use]
    pub fn scroll(&self) -> ScrollState {
        self.scroll
    }

    /// Force the view to its maximum offset.
    pub fn scroll_to_bottom(&mut self) {
        self.scroll.offset = self.scroll.max;
    }

    /// Move the view to `offset`, clamped to the scrollable range.
    pub fn scroll_to(&mut self, offset: usize) {
        self.scroll.offset = offset.min(self.scroll.max);
    }

    fn evict_overflow(&mut self) -> Vec<u64> {
        let Some(limit) = self.history_limit else {
            return Vec::new();
        };
        let mut excess = self.messages().count().saturating_sub(limit);
        let mut evicted = Vec::with_capacity(excess);
        self.entries.retain(|entry| match entry {
            Entry::Message(message) if excess > 0 => {
                excess -= 1;
                evicted.push(message.id);
                false
            }
            _ => true,
        });
        evicted
    }

    fn update_extent(&mut self) {
        self.scroll.max = self.entries.len();
        self.scroll.offset = self.scroll.offset.min(self.scroll.max);
    }
}
