//! The chat widget.
//!
//! A [`ChatWidget`] owns one conversation: the text currently typed into the
//! input, the [`Transcript`] shown in the history container, and the set of
//! requests still waiting on the remote endpoint.
//!
//! # Send cycle
//!
//! 1. The input is trimmed; empty input is ignored.
//! 2. The user message is appended and the input cleared.
//! 3. A loading indicator is appended and the view scrolled to the bottom.
//! 4. The query is sent on its own task.
//! 5. On settlement the indicator is removed and the reply (or the fallback
//!    text) appended, then the view is scrolled to the bottom again.
//!
//! Overlapping sends are independent: each has its own indicator and the
//! transcript reflects the order in which requests settle.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chat_widget::remote::HttpChatClient;
//! use chat_widget::widget::{ChatWidget, WidgetOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpChatClient::new("http://127.0.0.1:8000/chat")?);
//! let widget = ChatWidget::new(transport, WidgetOptions::default());
//! widget.send("Hello");
//! # Ok(())
//! # }
//! ```

mod clock;
mod events;
mod message;
mod transcript;

pub use clock::{Clock, FixedClock, SystemClock};
pub use events::{WidgetEvent, event_name, sse_event, sse_frame};
pub use message::{
    DEFAULT_TIME_FORMAT, Entry, FALLBACK_REPLY, LOADING_TEXT, LoadingId, LoadingIdGenerator,
    LoadingIndicator, Message, Sender, message_dom_id,
};
pub use transcript::{Appended, ScrollState, Transcript};

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::remote::{ChatReply, ChatTransport, TransportError};

/// Capacity of the event channel per widget.
const EVENT_CAPACITY: usize = 64;

/// Behavior switches for a widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetOptions {
    /// `strftime` layout for message timestamps.
    pub time_format: String,
    /// Maximum number of messages kept; `None` keeps everything.
    pub history_limit: Option<usize>,
    /// Refuse new sends while a request is pending.
    pub lock_while_pending: bool,
}

impl Default for WidgetOptions {
    fn default() -> Self {
        Self {
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            history_limit: None,
            lock_while_pending: false,
        }
    }
}

/// What a send action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SendOutcome {
    /// Input was empty after trimming; nothing happened.
    Ignored,
    /// Input is locked while a request is pending; nothing happened.
    Busy,
    /// The message was echoed and a request issued.
    Sent(Dispatch),
}

/// The entries a successful send appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    /// Echoed user message.
    pub message: Message,
    /// Indicator tracking the request.
    pub indicator: LoadingId,
    /// Messages evicted to make room for the echo.
    pub evicted: Vec<u64>,
}

/// A chat widget bound to one remote endpoint.
///
/// Cloning is cheap and yields a handle to the same conversation.
#[derive(Debug, Clone)]
pub struct ChatWidget {
    inner: Arc<WidgetInner>,
}

/// Non-owning handle to a [`ChatWidget`].
#[derive(Debug, Clone)]
pub struct WeakChatWidget {
    inner: Weak<WidgetInner>,
}

impl WeakChatWidget {
    /// The widget, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ChatWidget> {
        self.inner.upgrade().map(|inner| ChatWidget { inner })
    }
}

#[derive(Debug)]
struct WidgetInner {
    transport: Arc<dyn ChatTransport>,
    clock: Arc<dyn Clock>,
    options: WidgetOptions,
    state: RwLock<WidgetState>,
    /// Requests still waiting on the endpoint, keyed by indicator.
    in_flight: Mutex<HashMap<LoadingId, JoinHandle<()>>>,
    ids: LoadingIdGenerator,
    events: broadcast::Sender<WidgetEvent>,
}

#[derive(Debug)]
struct WidgetState {
    transcript: Transcript,
    input: String,
    input_focused: bool,
}

impl ChatWidget {
    /// Create a widget using the system clock.
    pub fn new(transport: Arc<dyn ChatTransport>, options: WidgetOptions) -> Self {
        Self::with_clock(transport, Arc::new(SystemClock), options)
    }

    /// Create a widget with an explicit clock.
    pub fn with_clock(
        transport: Arc<dyn ChatTransport>,
        clock: Arc<dyn Clock>,
        options: WidgetOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let transcript = Transcript::with_history_limit(options.history_limit);
        Self {
            inner: Arc::new(WidgetInner {
                transport,
                clock,
                options,
                state: RwLock::new(WidgetState {
                    transcript,
                    input: String::new(),
                    input_focused: true,
                }),
                in_flight: Mutex::new(HashMap::new()),
                ids: LoadingIdGenerator::new(),
                events,
            }),
        }
    }

    /// Options this widget was built with.
    #[must_use]
    pub fn options(&self) -> &WidgetOptions {
        &self.inner.options
    }

    /// Replace the text in the input field.
    pub fn set_input(&self, text: impl Into<String>) {
        self.write_state().input = text.into();
    }

    /// Current text in the input field.
    #[must_use]
    pub fn input(&self) -> String {
        self.read_state().input.clone()
    }

    /// Whether the input field holds keyboard focus.
    #[must_use]
    pub fn input_focused(&self) -> bool {
        self.read_state().input_focused
    }

    /// Type `text` into the input and trigger a send.
    pub fn send(&self, text: impl Into<String>) -> SendOutcome {
        self.set_input(text);
        self.submit()
    }

    /// Trigger a send with whatever the input currently holds.
    ///
    /// Must be called from within a Tokio runtime: the request runs on a
    /// spawned task and this returns as soon as the local echo is done.
    pub fn submit(&self) -> SendOutcome {
        let text = self.read_state().input.trim().to_string();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }

        let mut in_flight = self.lock_in_flight();
        if self.inner.options.lock_while_pending && !in_flight.is_empty() {
            debug!(
                name: "widget.send.busy",
                pending = in_flight.len(),
                "Send refused while a request is pending"
            );
            return SendOutcome::Busy;
        }

        let indicator = self.inner.ids.next(self.inner.clock.epoch_millis());

        // events go out under the state lock so snapshots and streams agree
        let Appended { message, evicted } = {
            let mut state = self.write_state();
            let appended = state.transcript.push_message(Message::user(
                text.clone(),
                self.inner.clock.as_ref(),
                &self.inner.options.time_format,
            ));
            state.input.clear();
            state.transcript.push_loading(indicator.clone());
            state.transcript.scroll_to_bottom();
            let _ = self.inner.events.send(WidgetEvent::Dispatched {
                message: appended.message.clone(),
                indicator: indicator.clone(),
                evicted: appended.evicted.clone(),
            });
            appended
        };

        info!(
            name: "widget.send.dispatched",
            indicator = %indicator,
            query_length = text.len(),
            "Dispatching chat query"
        );

        let widget = self.clone();
        let task_indicator = indicator.clone();
        let handle = tokio::spawn(async move {
            let result = widget.inner.transport.send(&text).await;
            widget.settle(&task_indicator, result);
        });
        in_flight.insert(indicator.clone(), handle);
        drop(in_flight);

        SendOutcome::Sent(Dispatch {
            message,
            indicator,
            evicted,
        })
    }

    /// Snapshot of the transcript.
    #[must_use]
    pub fn transcript(&self) -> Transcript {
        self.read_state().transcript.clone()
    }

    /// Current scroll state of the history view.
    #[must_use]
    pub fn scroll(&self) -> ScrollState {
        self.read_state().transcript.scroll()
    }

    /// Move the history view, as when the user scrolls up to read.
    pub fn scroll_to(&self, offset: usize) {
        self.write_state().transcript.scroll_to(offset);
    }

    /// Indicators whose requests have not settled yet.
    #[must_use]
    pub fn pending(&self) -> Vec<LoadingId> {
        let mut ids: Vec<_> = self.lock_in_flight().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Subscribe to transcript changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe together with the transcript the subscription starts from.
    ///
    /// Every event received afterwards describes a change not yet reflected
    /// in the returned transcript.
    #[must_use]
    pub fn subscribe_with_snapshot(&self) -> (broadcast::Receiver<WidgetEvent>, Transcript) {
        let state = self.read_state();
        (self.inner.events.subscribe(), state.transcript.clone())
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    /// Non-owning handle to this widget.
    #[must_use]
    pub fn downgrade(&self) -> WeakChatWidget {
        WeakChatWidget {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Abort every pending request.
    ///
    /// Indicators of aborted requests stay in the transcript; this is meant
    /// for tearing the widget down.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.lock_in_flight().drain().collect();
        for (indicator, handle) in drained {
            debug!(
                name: "widget.request.aborted",
                indicator = %indicator,
                "Aborting pending request"
            );
            handle.abort();
        }
    }

    fn settle(&self, indicator: &LoadingId, result: Result<ChatReply, TransportError>) {
        let (text, failure) = match result {
            Ok(reply) => (reply.text(), None),
            Err(e) => {
                error!(
                    name: "widget.send.failed",
                    indicator = %indicator,
                    error = %e,
                    "Chat request failed"
                );
                (FALLBACK_REPLY.to_string(), Some(e.to_string()))
            }
        };

        {
            let mut state = self.write_state();
            state.transcript.remove_loading(indicator);
            let Appended { message, evicted } = state.transcript.push_message(Message::system(
                text,
                self.inner.clock.as_ref(),
                &self.inner.options.time_format,
            ));
            state.transcript.scroll_to_bottom();

            if let Some(error) = failure {
                let _ = self.inner.events.send(WidgetEvent::RequestFailed {
                    indicator: indicator.clone(),
                    error,
                });
            }
            let _ = self.inner.events.send(WidgetEvent::Settled {
                indicator: indicator.clone(),
                message,
                evicted,
            });
        }
        self.lock_in_flight().remove(indicator);

        debug!(name: "widget.send.settled", indicator = %indicator, "Chat request settled");
    }

    fn read_state(&self) -> RwLockReadGuard<'_, WidgetState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, WidgetState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<LoadingId, JoinHandle<()>>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
