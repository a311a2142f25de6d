use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The JSON body posted to the webhook for every user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub message: String,
    pub session_id: String,
    /// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`
    pub timestamp: String,
    pub user_agent: String,
    pub page_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MessageEnvelope {
    pub fn new(
        message: &str,
        session_id: &str,
        user_agent: &str,
        page_url: &str,
        source: Option<&str>,
    ) -> Self {
        Self::at(Utc::now(), message, session_id, user_agent, page_url, source)
    }

    pub fn at(
        now: DateTime<Utc>,
        message: &str,
        session_id: &str,
        user_agent: &str,
        page_url: &str,
        source: Option<&str>,
    ) -> Self {
        Self {
            message: message.to_string(),
            session_id: session_id.to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            user_agent: user_agent.to_string(),
            page_url: page_url.to_string(),
            source: source.map(str::to_string),
        }
    }
}
