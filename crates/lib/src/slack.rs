//! Slack payload types and the chat-posting client.
//!
//! Covers the three inbound shapes the relay handles: the Events API envelope
//! (url_verification and event_callback), callback events (`app_mention` and
//! direct `message`s), and form-encoded slash commands. Also the outbound
//! `chat.postMessage` call used to answer event callbacks in-channel.

use serde::Deserialize;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Events API envelope (POST body of /api/slack/events).
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub typ: String,
    /// Present for url_verification; echoed back verbatim.
    #[serde(default)]
    pub challenge: Option<String>,
    /// Present for event_callback.
    #[serde(default)]
    pub event: Option<CallbackEvent>,
    #[serde(default)]
    pub team_id: Option<String>,
}

/// Inner event of an event_callback envelope. Only `app_mention` and direct
/// `message` events produce router calls; everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackEvent {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// im, channel, group, mpim.
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl CallbackEvent {
    /// Bot-authored messages (including our own replies) must be ignored or
    /// the relay would answer itself in a loop.
    pub fn is_bot_message(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }

    /// Direct message to the bot.
    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
            || self.channel.as_deref().is_some_and(|c| c.starts_with('D'))
    }

    /// Timestamp to thread replies under: an existing thread, else the message itself.
    pub fn reply_thread_ts(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }
}

/// Slash command payload (form-encoded POST body of /api/slack/commands).
#[derive(Debug, Deserialize)]
pub struct SlashCommand {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub response_url: Option<String>,
}

impl SlashCommand {
    /// Parse the raw form body. Raw bytes are kept for signature verification,
    /// so this runs after the verifier instead of axum's `Form` extractor.
    pub fn from_form(body: &[u8]) -> Result<Self, String> {
        serde_urlencoded::from_bytes(body).map_err(|e| e.to_string())
    }
}

/// Strip `<@USERID>` / `<@USERID|name>` mention markup and trim. The result is
/// the question text; callers must not route when it comes back empty.
pub fn strip_mentions(text: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find("<@") {
        match result[start..].find('>') {
            Some(end) => {
                result = format!("{}{}", &result[..start], &result[start + end + 1..]);
            }
            None => break,
        }
    }
    result.trim().to_string()
}

/// Slack Web API client for posting replies. Token is optional: without it,
/// sends fail with a descriptive error and the caller logs and drops the reply.
pub struct SlackClient {
    token: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            base_url: SLACK_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (for tests or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Post a message to a channel via chat.postMessage, optionally in a thread.
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<(), String> {
        let token = self.token.as_ref().ok_or("slack bot token not configured")?;
        let url = format!("{}/chat.postMessage", self.base_url);
        let mut body = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::Value::String(ts.to_string());
        }
        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("chat.postMessage failed: {} {}", status, body));
        }
        // Slack reports API-level failures in-band with ok: false.
        let data: serde_json::Value = res.json().await.map_err(|e| e.to_string())?;
        if data.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let err = data
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(format!("chat.postMessage returned ok: false ({})", err));
        }
        Ok(())
    }
}
