//! Bot logic capability: one method per routed activity kind.

use crate::activity::ChannelAccount;
use crate::turn::TurnContext;
use async_trait::async_trait;

/// Implemented by bot logic. An `Err` from any method fails the turn and triggers the
/// dispatcher's error notice.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    /// A `message` activity; `text` is the exact text received (empty when absent).
    async fn on_message(&self, ctx: &mut TurnContext, text: &str) -> anyhow::Result<()>;

    /// Called once per distinct member added by a `conversationUpdate`. The bot's own account
    /// (the activity's `recipient`) is skipped, so an update where only the bot joins gets no
    /// welcome and goes to `on_unrouted` instead.
    async fn on_member_added(
        &self,
        _ctx: &mut TurnContext,
        _member: &ChannelAccount,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Any other activity type, and `conversationUpdate`s that add no member besides the bot.
    async fn on_unrouted(&self, _ctx: &mut TurnContext) -> anyhow::Result<()> {
        Ok(())
    }
}
