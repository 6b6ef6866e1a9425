//! Turn dispatcher: middleware chain, routing by activity type and the turn-error hook.

use crate::activity::{ActivityType, ChannelAccount};
use crate::auth::VerifiedActivity;
use crate::connector::ActivitySender;
use crate::turn::{ActivityHandler, Middleware, Next, TurnContext, TurnState};
use std::sync::Arc;

/// Notice sent to the conversation when a turn fails and none is configured.
pub const DEFAULT_ERROR_NOTICE: &str = "An error occurred on the server.";

/// Result of one dispatched turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: String,
    /// `Completed` or `Failed`.
    pub state: TurnState,
    /// Error that failed the turn, rendered with its context chain.
    pub error: Option<String>,
    /// Activities sent during the turn, error notice included.
    pub sent: usize,
}

/// Members added by a `conversationUpdate`: distinct by id, without the bot's own account.
fn added_members(ctx: &TurnContext) -> Vec<ChannelAccount> {
    let activity = ctx.activity();
    let bot_id = activity.recipient.as_ref().map(|r| r.id.as_str());
    let mut out: Vec<ChannelAccount> = Vec::new();
    for m in activity.members_added.iter().flatten() {
        if Some(m.id.as_str()) == bot_id || out.iter().any(|o| o.id == m.id) {
            continue;
        }
        out.push(m.clone());
    }
    out
}

/// Route the turn to the handler method for its activity type.
pub(crate) async fn route(handler: &dyn ActivityHandler, ctx: &mut TurnContext) -> anyhow::Result<()> {
    ctx.set_state(TurnState::Routed);
    match ctx.activity().typ.clone() {
        ActivityType::Message => {
            let text = ctx.activity().text.clone().unwrap_or_default();
            handler.on_message(ctx, &text).await?;
        }
        ActivityType::ConversationUpdate => {
            let added = added_members(ctx);
            if added.is_empty() {
                handler.on_unrouted(ctx).await?;
            }
            for member in added {
                handler.on_member_added(ctx, &member).await?;
            }
        }
        ActivityType::Other(_) => handler.on_unrouted(ctx).await?,
    }
    ctx.set_state(TurnState::Handled);
    Ok(())
}

/// Runs verified activities through middleware and the handler. Cheap to share behind an `Arc`.
pub struct TurnDispatcher {
    middleware: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn ActivityHandler>,
    sender: Arc<dyn ActivitySender>,
    error_notice: String,
}

impl TurnDispatcher {
    pub fn new(handler: Arc<dyn ActivityHandler>, sender: Arc<dyn ActivitySender>) -> Self {
        Self {
            middleware: Vec::new(),
            handler,
            sender,
            error_notice: DEFAULT_ERROR_NOTICE.to_string(),
        }
    }

    /// Append `middleware`; middleware runs in the order it was added.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_error_notice(mut self, notice: impl Into<String>) -> Self {
        self.error_notice = notice.into();
        self
    }

    /// Process one turn to completion, error hook included. Never fails: handler errors end in
    /// a `Failed` outcome.
    pub async fn dispatch(&self, verified: VerifiedActivity) -> TurnOutcome {
        let mut ctx = TurnContext::new(verified, self.sender.clone());
        ctx.set_state(TurnState::Verified);
        let result = Next::new(&self.middleware, self.handler.as_ref())
            .run(&mut ctx)
            .await;
        let error = match result {
            Ok(()) => {
                ctx.set_state(TurnState::Completed);
                None
            }
            Err(e) => {
                ctx.set_state(TurnState::Failed);
                self.on_turn_error(&mut ctx, &e).await;
                Some(format!("{:#}", e))
            }
        };
        log::info!(
            "turn {} {} ({}, {} sent)",
            ctx.turn_id(),
            ctx.state(),
            ctx.activity().typ,
            ctx.sent()
        );
        TurnOutcome {
            turn_id: ctx.turn_id().to_string(),
            state: ctx.state(),
            error,
            sent: ctx.sent(),
        }
    }

    /// Log the failure and tell the conversation, best effort.
    async fn on_turn_error(&self, ctx: &mut TurnContext, err: &anyhow::Error) {
        log::error!("turn {} failed: {:#}", ctx.turn_id(), err);
        if let Err(e) = ctx.send_text(self.error_notice.clone()).await {
            log::warn!("turn {}: error notice not delivered: {}", ctx.turn_id(), e);
        }
    }
}
