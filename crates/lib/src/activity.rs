//! Activity envelope exchanged with the connector (Bot Framework JSON, camelCase).
//!
//! Parsing keeps unknown fields in `extra` so an activity survives a parse/serialize cycle
//! without losing content the gateway does not model.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Activity type: an open set. Unknown values are kept verbatim and pass through unrouted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    Message,
    ConversationUpdate,
    Other(String),
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::Message => "message",
            ActivityType::ConversationUpdate => "conversationUpdate",
            ActivityType::Other(s) => s,
        }
    }
}

impl From<String> for ActivityType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "message" => ActivityType::Message,
            "conversationUpdate" => ActivityType::ConversationUpdate,
            _ => ActivityType::Other(s),
        }
    }
}

impl From<ActivityType> for String {
    fn from(t: ActivityType) -> Self {
        match t {
            ActivityType::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account on either side of a conversation (user or bot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// "bot" or "user".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            role: None,
        }
    }

    pub fn is_bot(&self) -> bool {
        self.role.as_deref() == Some("bot")
    }
}

/// Conversation reference carried on every activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Normalized message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub typ: ActivityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Kept exactly as received; it selects the connector instance (region/tenant) to reply to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_added: Option<Vec<ChannelAccount>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_removed: Option<Vec<ChannelAccount>>,
    /// Fields the gateway does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Activity {
    /// Empty activity of the given type.
    pub fn new(typ: ActivityType) -> Self {
        Self {
            typ,
            id: None,
            timestamp: None,
            local_timestamp: None,
            channel_id: None,
            service_url: None,
            conversation: None,
            from: None,
            recipient: None,
            text: None,
            locale: None,
            reply_to_id: None,
            members_added: None,
            members_removed: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Message activity carrying `text`.
    pub fn message(text: impl Into<String>) -> Self {
        let mut a = Self::new(ActivityType::Message);
        a.text = Some(text.into());
        a
    }

    /// Opaque conversation identifier, if present and non-empty.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation
            .as_ref()
            .map(|c| c.id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Build a reply to `self` from `outgoing`: conversation and service URL are copied from the
    /// triggering activity, the bot account becomes `from`, and unset channel/locale are inherited.
    pub fn reply_from(&self, mut outgoing: Activity) -> Activity {
        outgoing.service_url = self.service_url.clone();
        outgoing.conversation = self.conversation.clone();
        outgoing.from = self.recipient.clone().map(|mut bot| {
            bot.role = Some("bot".to_string());
            bot
        });
        outgoing.recipient = self.from.clone();
        outgoing.reply_to_id = self.id.clone();
        if outgoing.channel_id.is_none() {
            outgoing.channel_id = self.channel_id.clone();
        }
        if outgoing.locale.is_none() {
            outgoing.locale = self.locale.clone();
        }
        if outgoing.timestamp.is_none() {
            outgoing.timestamp = Some(Utc::now());
        }
        outgoing
    }
}
