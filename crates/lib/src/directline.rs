//! Direct Line v3 client used to drive end-to-end conversations against a deployed bot.
//!
//! Flow: exchange the channel secret for a token, open a conversation, post a user message,
//! then poll the conversation's activities for the bot's replies.

use crate::activity::Activity;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Default request timeout for Direct Line calls.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum DirectLineError {
    #[error("direct line returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("direct line response lacks {0}")]
    MissingField(&'static str),
    #[error("direct line response unreadable: {0}")]
    Malformed(String),
    #[error("invalid direct line base url {0}")]
    InvalidBaseUrl(String),
    #[error("direct line request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Token issued by `tokens/generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectLineToken {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default, rename = "expires_in")]
    pub expires_in: Option<u64>,
}

/// An open Direct Line conversation. `watermark` advances with every poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub conversation_id: String,
    pub token: String,
    pub watermark: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResponse {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActivitySet {
    #[serde(default)]
    activities: Vec<Activity>,
    #[serde(default)]
    watermark: Option<String>,
}

/// Messages in `activities` sent by the bot (`from.role == "bot"`).
pub fn bot_replies(activities: &[Activity]) -> Vec<&Activity> {
    activities
        .iter()
        .filter(|a| a.typ == crate::activity::ActivityType::Message)
        .filter(|a| a.from.as_ref().is_some_and(|f| f.is_bot()))
        .collect()
}

/// Bot messages in `activities` answering the activity with id `sent_id`.
pub fn replies_to<'a>(activities: &'a [Activity], sent_id: &str) -> Vec<&'a Activity> {
    bot_replies(activities)
        .into_iter()
        .filter(|a| a.reply_to_id.as_deref() == Some(sent_id))
        .collect()
}

/// Client for `{base}/v3/directline`.
#[derive(Clone)]
pub struct DirectLineClient {
    api_base: reqwest::Url,
    client: reqwest::Client,
}

impl DirectLineClient {
    /// `base_url` is the Direct Line host, e.g. `https://europe.directline.botframework.com`.
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, DirectLineError> {
        let base = base_url.trim_end_matches('/');
        let api_base = reqwest::Url::parse(&format!("{}/v3/directline", base))
            .map_err(|e| DirectLineError::InvalidBaseUrl(format!("{}: {}", base_url, e)))?;
        if api_base.cannot_be_a_base() {
            return Err(DirectLineError::InvalidBaseUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()?;
        Ok(Self { api_base, client })
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn read<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, DirectLineError> {
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(DirectLineError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| DirectLineError::Malformed(e.to_string()))
    }

    /// POST /tokens/generate with the channel secret; the token is bound to `user_id`.
    pub async fn generate_token(
        &self,
        secret: &str,
        user_id: &str,
    ) -> Result<DirectLineToken, DirectLineError> {
        let res = self
            .client
            .post(self.endpoint(&["tokens", "generate"]))
            .bearer_auth(secret)
            .json(&json!({ "User": { "Id": user_id } }))
            .send()
            .await?;
        let token: DirectLineToken = Self::read(res).await?;
        if token.token.as_deref().map_or(true, str::is_empty) {
            return Err(DirectLineError::MissingField("token"));
        }
        Ok(token)
    }

    /// POST /conversations.
    pub async fn start_conversation(&self, token: &str) -> Result<Conversation, DirectLineError> {
        let res = self
            .client
            .post(self.endpoint(&["conversations"]))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        let data: ConversationResponse = Self::read(res).await?;
        let conversation_id = data
            .conversation_id
            .filter(|id| !id.is_empty())
            .ok_or(DirectLineError::MissingField("conversationId"))?;
        log::debug!("direct line conversation {} started", conversation_id);
        Ok(Conversation {
            conversation_id,
            token: data
                .token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| token.to_string()),
            watermark: None,
        })
    }

    /// POST /conversations/{id}/activities. Returns the activity id (empty when none).
    pub async fn send_activity(
        &self,
        conversation: &Conversation,
        activity: &Activity,
    ) -> Result<String, DirectLineError> {
        let res = self
            .client
            .post(self.endpoint(&[
                "conversations",
                &conversation.conversation_id,
                "activities",
            ]))
            .bearer_auth(&conversation.token)
            .json(activity)
            .send()
            .await?;
        let data: ResourceResponse = Self::read(res).await?;
        Ok(data.id.unwrap_or_default())
    }

    /// GET /conversations/{id}/activities from the current watermark; advances the watermark.
    pub async fn poll_activities(
        &self,
        conversation: &mut Conversation,
    ) -> Result<Vec<Activity>, DirectLineError> {
        let mut url = self.endpoint(&[
            "conversations",
            &conversation.conversation_id,
            "activities",
        ]);
        if let Some(w) = conversation.watermark.as_deref() {
            url.query_pairs_mut().append_pair("watermark", w);
        }
        let res = self
            .client
            .get(url)
            .bearer_auth(&conversation.token)
            .send()
            .await?;
        let set: ActivitySet = Self::read(res).await?;
        if set.watermark.is_some() {
            conversation.watermark = set.watermark;
        }
        Ok(set.activities)
    }

    /// Poll up to `attempts` times, `interval` apart, until the bot has answered the activity
    /// `sent_id`. Other bot messages, such as a welcome, are skipped. When `sent_id` is empty
    /// (the service returned no id) any bot message counts. Returns the matching replies, or an
    /// empty list when attempts ran out.
    pub async fn wait_for_bot_reply(
        &self,
        conversation: &mut Conversation,
        sent_id: &str,
        attempts: u32,
        interval: Duration,
    ) -> Result<Vec<Activity>, DirectLineError> {
        for attempt in 1..=attempts.max(1) {
            let activities = self.poll_activities(conversation).await?;
            let replies = if sent_id.is_empty() {
                bot_replies(&activities)
            } else {
                replies_to(&activities, sent_id)
            };
            if !replies.is_empty() {
                return Ok(replies.into_iter().cloned().collect());
            }
            log::debug!(
                "no bot reply yet (attempt {}/{}, watermark {:?})",
                attempt,
                attempts,
                conversation.watermark
            );
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Ok(Vec::new())
    }
}
