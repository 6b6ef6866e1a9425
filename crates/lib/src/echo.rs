//! Echo bot: repeats each message and greets new members.

use crate::activity::ChannelAccount;
use crate::turn::{ActivityHandler, TurnContext};
use anyhow::Context;
use async_trait::async_trait;

pub const WELCOME_TEXT: &str = "Bot ready. Say \"hello\".";

pub fn echo_text(text: &str) -> String {
    format!("You said: \"{}\"", text)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl ActivityHandler for EchoHandler {
    async fn on_message(&self, ctx: &mut TurnContext, text: &str) -> anyhow::Result<()> {
        ctx.send_text(echo_text(text))
            .await
            .context("sending echo reply")?;
        Ok(())
    }

    async fn on_member_added(
        &self,
        ctx: &mut TurnContext,
        member: &ChannelAccount,
    ) -> anyhow::Result<()> {
        log::debug!("welcoming {}", member.id);
        ctx.send_text(WELCOME_TEXT)
            .await
            .context("sending welcome")?;
        Ok(())
    }
}
