//! Relay HTTP surface.
//!
//! One axum server: health probe, the two signed Slack webhook endpoints
//! (events, slash commands), and the unsigned direct ask API.

mod server;

pub use server::{run_relay, RelayState};
