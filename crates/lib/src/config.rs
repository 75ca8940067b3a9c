//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.f8relay/config.json`) and environment.
//! Environment variables override file values; everything is resolved once at startup
//! into immutable state (signing secret, gateway URL, endpoint table) so nothing on
//! the request path reads the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Relay HTTP server settings.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Slack credentials (signing secret, bot token).
    #[serde(default)]
    pub slack: SlackConfig,

    /// Downstream agent endpoints and dispatch settings.
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Relay bind and port settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// HTTP port (default 14141).
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_relay_bind")]
    pub bind: String,
}

fn default_relay_port() -> u16 {
    14141
}

fn default_relay_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            bind: default_relay_bind(),
        }
    }
}

/// Slack credentials. Both are overridable via env (SLACK_SIGNING_SECRET, SLACK_BOT_TOKEN).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Signing secret for webhook verification. Without it, signed endpoints reject everything.
    pub signing_secret: Option<String>,
    /// Bot token for chat.postMessage. Without it, event replies are logged and dropped.
    pub bot_token: Option<String>,
}

/// Downstream agent settings: optional platform gateway, per-category endpoints, timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Platform gateway base URL. When set, the router tries {gateway}/api/chat first.
    pub gateway_url: Option<String>,

    /// Outbound call timeout in seconds (default 30; applies to gateway and direct calls).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-category agent base URLs. Each is overridable via F8_<CATEGORY>_AGENT_URL.
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            timeout_secs: default_timeout_secs(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

/// Base URLs for the topic agents. All optional; unset categories are unroutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsConfig {
    pub compliance: Option<String>,
    pub formulation: Option<String>,
    pub science: Option<String>,
    pub marketing: Option<String>,
    pub operations: Option<String>,
    pub sourcing: Option<String>,
    pub patents: Option<String>,
    pub lab_analysis: Option<String>,
    pub customer_support: Option<String>,
}

/// Non-empty trimmed env var, or None.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Non-empty trimmed config value, or None.
fn config_value(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the Slack signing secret: env SLACK_SIGNING_SECRET overrides config.
pub fn resolve_signing_secret(config: &Config) -> Option<String> {
    env_value("SLACK_SIGNING_SECRET").or_else(|| config_value(config.slack.signing_secret.as_ref()))
}

/// Resolve the Slack bot token: env SLACK_BOT_TOKEN overrides config.
pub fn resolve_bot_token(config: &Config) -> Option<String> {
    env_value("SLACK_BOT_TOKEN").or_else(|| config_value(config.slack.bot_token.as_ref()))
}

/// Resolve the platform gateway base URL: env F8_GATEWAY_URL overrides config.
/// Trailing slashes are stripped so path joins are uniform.
pub fn resolve_gateway_url(config: &Config) -> Option<String> {
    env_value("F8_GATEWAY_URL")
        .or_else(|| config_value(config.agents.gateway_url.as_ref()))
        .map(|u| u.trim_end_matches('/').to_string())
}

/// Resolve config path from env or default (~/.f8relay/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("F8_RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".f8relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or F8_RELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_relay_port_and_bind() {
        let r = RelayConfig::default();
        assert_eq!(r.port, 14141);
        assert_eq!(r.bind, "127.0.0.1");
    }

    #[test]
    fn default_timeout_is_thirty_seconds() {
        let a = AgentsConfig::default();
        assert_eq!(a.timeout_secs, 30);
        assert!(a.gateway_url.is_none());
    }

    #[test]
    fn empty_config_values_resolve_to_none() {
        let mut config = Config::default();
        config.slack.signing_secret = Some("   ".to_string());
        assert_eq!(resolve_signing_secret(&config), None);
        config.slack.signing_secret = Some("shhh".to_string());
        assert_eq!(resolve_signing_secret(&config), Some("shhh".to_string()));
    }

    #[test]
    fn gateway_url_strips_trailing_slash() {
        let mut config = Config::default();
        config.agents.gateway_url = Some("http://gateway.local/".to_string());
        assert_eq!(
            resolve_gateway_url(&config),
            Some("http://gateway.local".to_string())
        );
    }

    #[test]
    fn config_parses_with_partial_fields() {
        let config: Config = serde_json::from_str(
            r#"{"agents": {"endpoints": {"compliance": "http://c.local", "labAnalysis": "http://l.local"}}}"#,
        )
        .expect("parse");
        assert_eq!(config.agents.endpoints.compliance.as_deref(), Some("http://c.local"));
        assert_eq!(config.agents.endpoints.lab_analysis.as_deref(), Some("http://l.local"));
        assert!(config.agents.endpoints.marketing.is_none());
        assert_eq!(config.relay.port, 14141);
    }
}
