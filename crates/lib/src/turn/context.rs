//! Per-turn context handed to middleware and handlers.

use crate::activity::Activity;
use crate::auth::{ChannelRoute, VerifiedActivity};
use crate::connector::ActivitySender;
use crate::error::GatewayError;
use std::sync::Arc;

/// Lifecycle of one inbound activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    Verified,
    Routed,
    Handled,
    Completed,
    Failed,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Received => "received",
            TurnState::Verified => "verified",
            TurnState::Routed => "routed",
            TurnState::Handled => "handled",
            TurnState::Completed => "completed",
            TurnState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a handler needs for one turn. Owned by the dispatcher for the duration of
/// `dispatch` and never stored beyond it.
pub struct TurnContext {
    turn_id: String,
    activity: Activity,
    route: ChannelRoute,
    sender: Arc<dyn ActivitySender>,
    state: TurnState,
    sent: usize,
}

impl TurnContext {
    pub fn new(verified: VerifiedActivity, sender: Arc<dyn ActivitySender>) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            activity: verified.activity,
            route: verified.route,
            sender,
            state: TurnState::Received,
            sent: 0,
        }
    }

    /// Id used to correlate log lines of one turn.
    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    /// The triggering activity.
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Route the inbound activity was verified on; replies are delivered through it.
    pub fn route(&self) -> ChannelRoute {
        self.route
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TurnState) {
        log::debug!("turn {}: {} -> {}", self.turn_id, self.state, state);
        self.state = state;
    }

    /// Number of activities sent successfully during this turn.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Send `outgoing` as a reply in the triggering conversation. Service URL, conversation and
    /// accounts are taken from the triggering activity, the token authority from its route.
    pub async fn send_activity(&mut self, outgoing: Activity) -> Result<String, GatewayError> {
        let reply = self.activity.reply_from(outgoing);
        let id = self.sender.send(&reply, self.route).await?;
        self.sent += 1;
        Ok(id)
    }

    /// Send a plain text message reply.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<String, GatewayError> {
        self.send_activity(Activity::message(text)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RouteLog(Mutex<Vec<(Option<String>, ChannelRoute)>>);

    #[async_trait]
    impl ActivitySender for RouteLog {
        async fn send(&self, activity: &Activity, route: ChannelRoute) -> Result<String, GatewayError> {
            self.0.lock().unwrap().push((activity.text.clone(), route));
            Ok("out-1".to_string())
        }
    }

    #[tokio::test]
    async fn replies_use_the_verified_route() {
        let log = Arc::new(RouteLog::default());
        let verified = VerifiedActivity {
            activity: serde_json::from_value(json!({
                "type": "message",
                "id": "in-1",
                "serviceUrl": "https://webchat.botframework.com/",
                "conversation": { "id": "conv-1" },
                "text": "hi"
            }))
            .unwrap(),
            route: ChannelRoute::Regional,
        };
        let mut ctx = TurnContext::new(verified, log.clone());
        assert_eq!(ctx.state(), TurnState::Received);
        assert_eq!(ctx.route(), ChannelRoute::Regional);

        assert_eq!(ctx.send_text("pong").await.unwrap(), "out-1");
        assert_eq!(ctx.sent(), 1);
        assert_eq!(
            *log.0.lock().unwrap(),
            vec![(Some("pong".to_string()), ChannelRoute::Regional)]
        );
    }
}
