//! Middleware chain run before routing.

use crate::turn::dispatcher::route;
use crate::turn::{ActivityHandler, TurnContext};
use async_trait::async_trait;
use std::sync::Arc;

/// A step that runs around the rest of the turn. Call `next.run(ctx)` to continue; returning
/// without calling it ends the turn without routing.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_turn(&self, ctx: &mut TurnContext, next: Next<'_>) -> anyhow::Result<()>;
}

/// Continuation: the remaining middleware, then routing to the handler.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    handler: &'a dyn ActivityHandler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a [Arc<dyn Middleware>], handler: &'a dyn ActivityHandler) -> Self {
        Self {
            middleware,
            handler,
        }
    }

    pub async fn run(self, ctx: &mut TurnContext) -> anyhow::Result<()> {
        match self.middleware.split_first() {
            Some((first, rest)) => first.on_turn(ctx, Next::new(rest, self.handler)).await,
            None => route(self.handler, ctx).await,
        }
    }
}

/// Logs every inbound activity (summary at info, raw JSON at debug) without changing it.
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn on_turn(&self, ctx: &mut TurnContext, next: Next<'_>) -> anyhow::Result<()> {
        let a = ctx.activity();
        let account = |acc: Option<&crate::activity::ChannelAccount>| {
            acc.map(|c| format!("{} ({})", c.id, c.role.as_deref().unwrap_or("-")))
                .unwrap_or_else(|| "-".to_string())
        };
        log::info!(
            "activity in [{}]: type={} channelId={} serviceUrl={} from={} recipient={} text={:?}",
            ctx.turn_id(),
            a.typ,
            a.channel_id.as_deref().unwrap_or("-"),
            a.service_url.as_deref().unwrap_or("-"),
            account(a.from.as_ref()),
            account(a.recipient.as_ref()),
            a.text.as_deref().unwrap_or("")
        );
        if log::log_enabled!(log::Level::Debug) {
            match serde_json::to_string(a) {
                Ok(raw) => log::debug!("raw activity [{}]: {}", ctx.turn_id(), raw),
                Err(e) => log::warn!("could not serialize activity for logging: {}", e),
            }
        }
        next.run(ctx).await
    }
}
