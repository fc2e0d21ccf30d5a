//! Page-session storage.
//!
//! Every page load gets its own widget, so a reload starts from an empty
//! transcript. Sessions are identified by UUID and swept once idle for
//! longer than the configured timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chat_widget::remote::HttpChatClient;
//! use chat_widget::session::{SessionStore, WidgetFactory};
//! use chat_widget::widget::WidgetOptions;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpChatClient::new("http://127.0.0.1:8000/chat")?);
//! let store = SessionStore::new(WidgetFactory::new(transport, WidgetOptions::default()));
//! let session = store.create();
//! assert!(store.get(session.id()).is_some());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::remote::ChatTransport;
use crate::widget::{ChatWidget, Clock, SystemClock, WidgetOptions};

/// Default session timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Builds identically configured widgets.
#[derive(Debug, Clone)]
pub struct WidgetFactory {
    transport: Arc<dyn ChatTransport>,
    clock: Arc<dyn Clock>,
    options: WidgetOptions,
}

impl WidgetFactory {
    pub fn new(transport: Arc<dyn ChatTransport>, options: WidgetOptions) -> Self {
        Self::with_clock(transport, Arc::new(SystemClock), options)
    }

    pub fn with_clock(
        transport: Arc<dyn ChatTransport>,
        clock: Arc<dyn Clock>,
        options: WidgetOptions,
    ) -> Self {
        Self {
            transport,
            clock,
            options,
        }
    }

    /// Build a fresh widget.
    #[must_use]
    pub fn build(&self) -> ChatWidget {
        ChatWidget::with_clock(
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
            self.options.clone(),
        )
    }
}

/// One page session and its widget.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    widget: ChatWidget,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl Session {
    fn new(id: String, widget: ChatWidget) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(SessionInner {
                id,
                widget,
                created_at: now,
                last_activity: RwLock::new(now),
            }),
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The session's widget.
    #[must_use]
    pub fn widget(&self) -> &ChatWidget {
        &self.inner.widget
    }

    /// Update the last activity timestamp.
    pub fn touch(&self) {
        let mut guard = self
            .inner
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Utc::now();
    }

    /// Check if the session has been idle longer than `timeout`.
    ///
    /// Sessions with a request still pending or an open event stream never
    /// expire.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        if self.inner.widget.subscriber_count() > 0 || !self.inner.widget.pending().is_empty() {
            return false;
        }
        let last = *self
            .inner
            .last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        // negative when the clock went backwards
        (Utc::now() - last)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }

    /// Get the session age.
    #[must_use]
    pub fn age(&self) -> Duration {
        (Utc::now() - self.inner.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Thread-safe store for sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

#[derive(Debug)]
struct SessionStoreInner {
    sessions: RwLock<HashMap<String, Session>>,
    factory: WidgetFactory,
}

impl SessionStore {
    /// Create a new session store.
    #[must_use]
    pub fn new(factory: WidgetFactory) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                factory,
            }),
        }
    }

    /// Create a new session with a fresh widget and return it.
    #[must_use]
    pub fn create(&self) -> Session {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), self.inner.factory.build());
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, session.clone());
        session
    }

    /// Get a session by ID, marking it active.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        let session = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()?;
        session.touch();
        Some(session)
    }

    /// Remove a session by ID, aborting its pending requests.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(session) = &removed {
            session.widget().shutdown();
        }
        removed
    }

    /// Get the number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions that have been inactive longer than the timeout.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|_, session| {
            let expired = session.is_expired_with_timeout(timeout);
            if expired {
                session.widget().shutdown();
            }
            !expired
        });
        before - guard.len()
    }

    /// Drop every session, aborting all pending requests.
    pub fn shutdown_all(&self) {
        let drained: Vec<_> = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, session) in drained {
            session.widget().shutdown();
        }
    }
}
