//! Message exchange client — one webhook POST per user message
//!
//! `WebhookClient::exchange` returns typed errors; `WebhookClient::send` is
//! the widget-facing boundary that turns every failure into a displayable
//! error reply so nothing escapes as an uncaught failure. There is no retry,
//! no client-side timeout and no cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::config::{Profile, WebhookConfig};
use crate::envelope::MessageEnvelope;
use crate::reply::{truncate, ReplyParser};
use crate::session::SessionIdentity;

/// Longest error body kept in `ExchangeError::Status`
const ERROR_BODY_LIMIT: usize = 200;

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Webhook returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
}

impl ExchangeError {
    /// Text shown in the transcript in place of a reply.
    pub fn user_message(&self) -> String {
        match self {
            ExchangeError::Transport(_) => {
                "Sorry, I couldn't connect to the assistant. Please check your connection and try again."
                    .to_string()
            }
            ExchangeError::Status { code, .. } => format!(
                "Sorry, I couldn't reach the assistant (HTTP {}). Please try again.",
                code
            ),
            ExchangeError::Body(_) => {
                "Sorry, the assistant's reply could not be read. Please try again.".to_string()
            }
        }
    }
}

// ============================================================================
// Displayable reply
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Assistant,
    Error,
}

/// Final text rendered into the transcript for one send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayableReply {
    pub text: String,
    pub kind: ReplyKind,
}

impl DisplayableReply {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ReplyKind::Assistant,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ReplyKind::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == ReplyKind::Error
    }
}

// ============================================================================
// MessageExchange trait
// ============================================================================

/// The seam between the chat thread and whatever answers it.
#[async_trait]
pub trait MessageExchange: Send + Sync {
    /// Send one user message. Returns `None` when the input is rejected
    /// (empty or whitespace-only) and no request was made.
    async fn send(&self, text: &str) -> Option<DisplayableReply>;
}

// ============================================================================
// WebhookClient
// ============================================================================

pub struct WebhookClient {
    client: Client,
    url: String,
    user_agent: String,
    page_url: String,
    source: Option<String>,
    session: Arc<SessionIdentity>,
    parser: ReplyParser,
}

impl WebhookClient {
    pub fn new(
        config: &WebhookConfig,
        profile: Profile,
        session: Arc<SessionIdentity>,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ExchangeError::Transport)?;

        Ok(Self {
            client,
            url: config.url.clone(),
            user_agent: config.user_agent.clone(),
            page_url: config.page_url.clone(),
            source: profile.source().map(str::to_string),
            session,
            parser: ReplyParser::default(),
        })
    }

    /// Replace the default reply extraction chain.
    pub fn with_parser(mut self, parser: ReplyParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build a fresh envelope for `text` under the current session.
    pub fn envelope(&self, text: &str) -> MessageEnvelope {
        MessageEnvelope::new(
            text,
            &self.session.get_or_create(),
            &self.user_agent,
            &self.page_url,
            self.source.as_deref(),
        )
    }

    /// POST `text` to the webhook and normalize the reply.
    ///
    /// `Ok(None)` means the input was empty and nothing was sent.
    pub async fn exchange(&self, text: &str) -> Result<Option<String>, ExchangeError> {
        if text.trim().is_empty() {
            tracing::debug!("Ignoring empty message");
            return Ok(None);
        }

        let envelope = self.envelope(text);
        tracing::info!(
            session_id = %envelope.session_id,
            chars = text.chars().count(),
            url = %self.url,
            "Sending message to webhook"
        );

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .json(&envelope)
            .send()
            .await
            .map_err(ExchangeError::Transport)?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), body = %body, "Webhook returned error status");
            return Err(ExchangeError::Status {
                code: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let body = response.text().await.map_err(ExchangeError::Body)?;
        Ok(Some(self.parser.interpret_body(&body)))
    }
}

#[async_trait]
impl MessageExchange for WebhookClient {
    async fn send(&self, text: &str) -> Option<DisplayableReply> {
        match self.exchange(text).await {
            Ok(Some(reply)) => Some(DisplayableReply::assistant(reply)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Message exchange failed");
                Some(DisplayableReply::error(e.user_message()))
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
