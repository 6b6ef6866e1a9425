//! Parley core library: connector authentication, turn dispatch, outbound delivery and the
//! gateway server, shared by the `parley` CLI.

pub mod activity;
pub mod auth;
pub mod config;
pub mod connector;
pub mod directline;
pub mod echo;
pub mod error;
pub mod gateway;
pub mod turn;
