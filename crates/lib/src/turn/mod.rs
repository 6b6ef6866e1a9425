//! Turn processing for verified inbound activities.
//!
//! The gateway hands each [`VerifiedActivity`](crate::auth::VerifiedActivity) to a
//! [`TurnDispatcher`], which runs the middleware chain, routes the activity to the
//! [`ActivityHandler`] and, on failure, sends an error notice to the conversation.

mod context;
mod dispatcher;
mod handler;
mod middleware;

pub use context::{TurnContext, TurnState};
pub use dispatcher::{TurnDispatcher, TurnOutcome, DEFAULT_ERROR_NOTICE};
pub use handler::ActivityHandler;
pub use middleware::{LoggingMiddleware, Middleware, Next};
