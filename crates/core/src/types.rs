use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of message severities shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Success,
    Error,
    Warning,
    #[default]
    Info,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [Self::Success, Self::Error, Self::Warning, Self::Info];

    /// Maps an arbitrary label onto the enumeration, coercing unknown values to [`MessageType::Info`].
    pub fn from_label(value: &str) -> Self {
        Self::parse(value).unwrap_or_default()
    }

    /// Strict parse used where an unknown label is an error (e.g. query filters).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }

    /// Returns the canonical database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted webhook message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Normalized payload produced by the validator, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedMessage {
    pub message_type: MessageType,
    pub title: String,
    pub message: String,
    pub metadata: Map<String, Value>,
    pub source: Option<String>,
    pub reported_at: Option<String>,
}

/// Request-derived fields attached to a message at ingestion time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Everything the store needs to insert a row; the id is assigned on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub message: ValidatedMessage,
    pub context: RequestContext,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(message: ValidatedMessage, context: RequestContext, created_at: DateTime<Utc>) -> Self {
        Self {
            message,
            context,
            created_at,
        }
    }

    /// Materializes the persisted row once the store has chosen an identifier.
    pub fn into_message(self, id: String) -> WebhookMessage {
        WebhookMessage {
            id,
            message_type: self.message.message_type,
            title: self.message.title,
            message: self.message.message,
            metadata: self.message.metadata,
            source: self.message.source,
            reported_at: self.message.reported_at,
            origin_ip: self.context.origin_ip,
            user_agent: self.context.user_agent,
            created_at: self.created_at,
        }
    }
}
