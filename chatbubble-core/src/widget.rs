//! Chat thread controller
//!
//! Holds the in-memory transcript and the pending ("typing") indicator and
//! drives one `MessageExchange::send` per submit. Submits are not serialized:
//! overlapping sends are allowed, replies land in arrival order, and the
//! pending indicator drops at the first settlement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::{DisplayableReply, MessageExchange, ReplyKind, WebhookClient};
use crate::config::{AppearanceConfig, WidgetConfig};
use crate::error::ChatBubbleError;
use crate::session::SessionIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Welcome,
    User,
    Assistant,
    Error,
}

impl From<ReplyKind> for Role {
    fn from(kind: ReplyKind) -> Self {
        match kind {
            ReplyKind::Assistant => Role::Assistant,
            ReplyKind::Error => Role::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

pub struct ChatWidget {
    exchange: Arc<dyn MessageExchange>,
    appearance: AppearanceConfig,
    transcript: Mutex<Vec<TranscriptEntry>>,
    pending: AtomicBool,
}

impl ChatWidget {
    pub fn new(exchange: Arc<dyn MessageExchange>, appearance: AppearanceConfig) -> Self {
        let widget = Self {
            exchange,
            appearance,
            transcript: Mutex::new(Vec::new()),
            pending: AtomicBool::new(false),
        };
        if !widget.appearance.welcome_text.trim().is_empty() {
            let welcome = widget.appearance.welcome_text.clone();
            widget.push(Role::Welcome, welcome);
        }
        widget
    }

    /// Wire the session stores, webhook client and transcript from config.
    pub fn from_config(config: &WidgetConfig) -> Result<Self, ChatBubbleError> {
        let session = Arc::new(SessionIdentity::from_config(&config.session)?);
        let client = WebhookClient::new(&config.webhook, config.session.profile, session)?;
        tracing::debug!(
            url = client.url(),
            profile = ?config.session.profile,
            "Chat widget configured"
        );
        Ok(Self::new(Arc::new(client), config.appearance.clone()))
    }

    pub fn appearance(&self) -> &AppearanceConfig {
        &self.appearance
    }

    /// Header line: assistant name and title.
    pub fn header(&self) -> String {
        let a = &self.appearance;
        if a.assistant_title.is_empty() {
            a.assistant_name.clone()
        } else {
            format!("{} · {}", a.assistant_name, a.assistant_title)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Post a user message and append whatever comes back.
    ///
    /// Empty or whitespace-only input is ignored and returns `None`.
    pub async fn submit(&self, text: &str) -> Option<DisplayableReply> {
        if text.trim().is_empty() {
            return None;
        }

        self.push(Role::User, text.to_string());

        let reply = {
            let _pending = PendingGuard::raise(&self.pending);
            self.exchange.send(text).await
        };

        let reply = reply?;
        self.push(reply.kind.into(), reply.text.clone());
        Some(reply)
    }

    fn push(&self, role: Role, text: String) {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(TranscriptEntry {
                role,
                text,
                at: Utc::now(),
            });
    }
}

/// Raises the pending flag and lowers it on drop, including when the
/// submit future is dropped mid-flight.
struct PendingGuard<'a>(&'a AtomicBool);

impl<'a> PendingGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
