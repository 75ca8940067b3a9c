//! F8 relay core library — webhook signature verification, agent routing,
//! Slack payload handling, and the relay HTTP surface used by the CLI.

pub mod config;
pub mod gateway;
pub mod routing;
pub mod slack;
pub mod verify;
