//! Gateway: the connector-facing HTTP endpoint.
//!
//! `POST /api/messages` receives activities from the channel connector, verifies them and runs
//! one turn per activity; health and OAuth diagnostics are served on the same port.

mod server;

pub use server::{router, run_gateway, GatewayState};
