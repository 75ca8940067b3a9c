//! Agent routing: classify a free-text question into a topic category and
//! dispatch it to a downstream agent over HTTP.
//!
//! Dispatch order: when a platform gateway is configured its `/api/chat` is
//! tried first; on any failure (timeout, non-2xx, unparseable body) the router
//! falls back to direct selection — keyword classification picks a category,
//! the category's endpoint gets one `POST {base}/query`, and that outcome is
//! terminal. The router has no side effects of its own and holds no mutable
//! state; every call is a pure function of the request plus startup config.

use crate::config::{self, Config, EndpointsConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Returned when the classified category (or the default) has no endpoint.
pub const NO_AGENT_MESSAGE: &str = "No suitable agent found for this request";

/// Returned when the direct agent call fails. Never carries internal error text.
pub const DISPATCH_ERROR_MESSAGE: &str = "Error processing request. Please try again later.";

/// Routing bucket for a question. Each category maps to at most one agent endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Compliance,
    Formulation,
    Science,
    Marketing,
    Operations,
    Sourcing,
    Patents,
    LabAnalysis,
    CustomerSupport,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Compliance,
        Category::Formulation,
        Category::Science,
        Category::Marketing,
        Category::Operations,
        Category::Sourcing,
        Category::Patents,
        Category::LabAnalysis,
        Category::CustomerSupport,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Compliance => "compliance",
            Category::Formulation => "formulation",
            Category::Science => "science",
            Category::Marketing => "marketing",
            Category::Operations => "operations",
            Category::Sourcing => "sourcing",
            Category::Patents => "patents",
            Category::LabAnalysis => "lab-analysis",
            Category::CustomerSupport => "customer-support",
        }
    }

    /// Env var that overrides this category's configured endpoint.
    fn env_var(self) -> &'static str {
        match self {
            Category::Compliance => "F8_COMPLIANCE_AGENT_URL",
            Category::Formulation => "F8_FORMULATION_AGENT_URL",
            Category::Science => "F8_SCIENCE_AGENT_URL",
            Category::Marketing => "F8_MARKETING_AGENT_URL",
            Category::Operations => "F8_OPERATIONS_AGENT_URL",
            Category::Sourcing => "F8_SOURCING_AGENT_URL",
            Category::Patents => "F8_PATENTS_AGENT_URL",
            Category::LabAnalysis => "F8_LAB_ANALYSIS_AGENT_URL",
            Category::CustomerSupport => "F8_CUSTOMER_SUPPORT_AGENT_URL",
        }
    }
}

/// Keyword table, evaluated top to bottom; first category with a matching
/// substring wins. Vocabularies overlap (e.g. "testing" and "analysis" appear
/// under both science and lab-analysis), so the order here is load-bearing and
/// must not be reshuffled.
const CATEGORY_KEYWORDS: [(Category, &[&str]); 9] = [
    (Category::Compliance, &["compliance", "regulation", "fda", "legal", "sop"]),
    (Category::Formulation, &["formulation", "recipe", "ingredient", "dosage", "concentration"]),
    (Category::Science, &["science", "research", "study", "analysis", "testing"]),
    (Category::Marketing, &["marketing", "brand", "promotion", "advertising", "social media"]),
    (Category::Operations, &["operation", "process", "workflow", "efficiency", "management"]),
    (Category::Sourcing, &["sourcing", "supplier", "vendor", "procurement", "supply chain"]),
    (Category::Patents, &["patent", "intellectual property", " ip ", "trademark", "copyright"]),
    (Category::LabAnalysis, &["spectra", "gcms", "coa", "testing", "analysis"]),
    (Category::CustomerSupport, &["customer", "support", "help", "issue", "problem"]),
];

/// Classify a message into a category by case-insensitive substring match over
/// the raw (untokenized) text. Falls back to compliance when nothing matches —
/// the documented behavior, kept for compatibility with existing consumers.
pub fn classify(message: &str) -> Category {
    let haystack = message.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS.iter() {
        if keywords.iter().any(|k| haystack.contains(k)) {
            return *category;
        }
    }
    Category::Compliance
}

/// Immutable category → base URL map, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct AgentEndpointTable {
    entries: HashMap<Category, String>,
}

impl AgentEndpointTable {
    /// Resolve from config, with per-category env overrides
    /// (`F8_<CATEGORY>_AGENT_URL`). Trailing slashes are stripped.
    pub fn resolve(endpoints: &EndpointsConfig) -> Self {
        let configured = |c: Category| -> Option<&String> {
            match c {
                Category::Compliance => endpoints.compliance.as_ref(),
                Category::Formulation => endpoints.formulation.as_ref(),
                Category::Science => endpoints.science.as_ref(),
                Category::Marketing => endpoints.marketing.as_ref(),
                Category::Operations => endpoints.operations.as_ref(),
                Category::Sourcing => endpoints.sourcing.as_ref(),
                Category::Patents => endpoints.patents.as_ref(),
                Category::LabAnalysis => endpoints.lab_analysis.as_ref(),
                Category::CustomerSupport => endpoints.customer_support.as_ref(),
            }
        };
        let mut entries = HashMap::new();
        for category in Category::ALL {
            let url = std::env::var(category.env_var())
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    configured(category)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                });
            if let Some(url) = url {
                entries.insert(category, url.trim_end_matches('/').to_string());
            }
        }
        Self { entries }
    }

    pub fn get(&self, category: Category) -> Option<&str> {
        self.entries.get(&category).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A question bound for a downstream agent. `message` must be non-empty after
/// trimming; handlers that cannot produce one short-circuit before routing.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub message: String,
    pub user_id: String,
    /// Open-ended requester metadata (channel, thread_ts, event_type, flags).
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl AgentRequest {
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            context: serde_json::Map::new(),
        }
    }

    /// Add a context entry (builder style).
    pub fn with_context(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// An agent's answer (or a classified failure). When `success` is false,
/// `message` always carries a user-safe explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl AgentResponse {
    pub fn failure(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            agent: None,
            usage: None,
            timestamp: None,
        }
    }

    /// Fill in `timestamp` with the current time when the agent left it unset.
    pub fn ensure_timestamp(mut self) -> Self {
        if self.timestamp.is_none() {
            self.timestamp = Some(chrono::Utc::now().to_rfc3339());
        }
        self
    }
}

/// Token/cost accounting reported by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentCallError {
    #[error("agent request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("agent api error: {0}")]
    Api(String),
}

/// Dispatches questions to downstream agents. Cheap to clone; all fields are
/// read-only after construction.
#[derive(Clone)]
pub struct AgentRouter {
    client: reqwest::Client,
    gateway_url: Option<String>,
    endpoints: AgentEndpointTable,
    timeout: Duration,
}

impl AgentRouter {
    pub fn new(
        gateway_url: Option<String>,
        endpoints: AgentEndpointTable,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url,
            endpoints,
            timeout,
        }
    }

    /// Build from resolved config (env overrides applied here, once).
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config::resolve_gateway_url(config),
            AgentEndpointTable::resolve(&config.agents.endpoints),
            Duration::from_secs(config.agents.timeout_secs),
        )
    }

    pub fn endpoints(&self) -> &AgentEndpointTable {
        &self.endpoints
    }

    /// Route a question: gateway attempt (when configured), then keyword
    /// classification and a single direct attempt. Infallible — failures come
    /// back as `AgentResponse { success: false, .. }` with a user-safe message.
    pub async fn route(&self, request: &AgentRequest) -> AgentResponse {
        if let Some(ref gateway) = self.gateway_url {
            let url = format!("{}/api/chat", gateway);
            match self.call(&url, request).await {
                Ok(response) => return response,
                Err(e) => {
                    log::warn!("gateway dispatch failed, falling back to direct agent: {}", e);
                }
            }
        }

        let category = classify(&request.message);
        let Some(base) = self.endpoints.get(category) else {
            log::warn!(
                "no endpoint configured for {} agent; request unroutable",
                category.name()
            );
            return AgentResponse::failure(NO_AGENT_MESSAGE);
        };

        let url = format!("{}/query", base);
        match self.call(&url, request).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("direct dispatch to {} agent failed: {}", category.name(), e);
                AgentResponse::failure(DISPATCH_ERROR_MESSAGE).ensure_timestamp()
            }
        }
    }

    /// POST the request body `{message, user_id, context}` to an agent URL.
    /// Any non-2xx status or unparseable body is an error.
    async fn call(&self, url: &str, request: &AgentRequest) -> Result<AgentResponse, AgentCallError> {
        let res = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AgentCallError::Api(format!("{} {}", status, body)));
        }
        let data: AgentResponse = res.json().await?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_category_by_keyword() {
        assert_eq!(classify("What are FDA regulations?"), Category::Compliance);
        assert_eq!(classify("best dosage for this recipe"), Category::Formulation);
        assert_eq!(classify("latest research on terpenes"), Category::Science);
        assert_eq!(classify("our social media promotion"), Category::Marketing);
        assert_eq!(classify("improve workflow efficiency"), Category::Operations);
        assert_eq!(classify("find a new supplier"), Category::Sourcing);
        assert_eq!(classify("file a trademark"), Category::Patents);
        assert_eq!(classify("read these gcms spectra"), Category::LabAnalysis);
        assert_eq!(classify("I need help with my account"), Category::CustomerSupport);
    }

    #[test]
    fn unmatched_messages_default_to_compliance() {
        assert_eq!(classify("random text"), Category::Compliance);
        assert_eq!(classify(""), Category::Compliance);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(classify("TRADEMARK question"), Category::Patents);
        assert_eq!(classify("Supply Chain delays"), Category::Sourcing);
    }

    #[test]
    fn evaluation_order_resolves_overlaps() {
        // "testing" and "analysis" appear under both science and lab-analysis;
        // science is evaluated first and wins.
        assert_eq!(classify("testing results"), Category::Science);
        assert_eq!(classify("analysis of the batch"), Category::Science);
        // A keyword from an earlier category beats one from a later category.
        assert_eq!(classify("marketing for our new supplier"), Category::Marketing);
        assert_eq!(classify("legal issue with a customer"), Category::Compliance);
    }

    #[test]
    fn ip_keyword_requires_surrounding_spaces() {
        assert_eq!(classify("what about ip law here"), Category::Patents);
        // "ip" embedded in a word must not match.
        assert_eq!(classify("shipment arrived"), Category::Compliance);
    }

    #[test]
    fn classification_is_deterministic() {
        let msg = "testing analysis support help";
        let first = classify(msg);
        for _ in 0..10 {
            assert_eq!(classify(msg), first);
        }
    }

    #[test]
    fn endpoint_table_resolves_and_strips_slashes() {
        let mut endpoints = EndpointsConfig::default();
        endpoints.compliance = Some("http://c.local/".to_string());
        endpoints.customer_support = Some("  http://s.local  ".to_string());
        let table = AgentEndpointTable::resolve(&endpoints);
        assert_eq!(table.get(Category::Compliance), Some("http://c.local"));
        assert_eq!(table.get(Category::CustomerSupport), Some("http://s.local"));
        assert_eq!(table.get(Category::Marketing), None);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn unroutable_request_fails_without_http() {
        // No gateway, empty endpoint table: the router must return the
        // no-agent failure without attempting any call.
        let router = AgentRouter::new(
            None,
            AgentEndpointTable::default(),
            Duration::from_secs(1),
        );
        let request = AgentRequest::new("random text", "U123");
        let response = router.route(&request).await;
        assert!(!response.success);
        assert_eq!(response.message, NO_AGENT_MESSAGE);
        assert!(response.agent.is_none());
    }

    #[tokio::test]
    async fn direct_failure_returns_safe_message_with_timestamp() {
        // Endpoint points at a port nothing listens on: connection refused is
        // a terminal direct failure.
        let mut endpoints = EndpointsConfig::default();
        endpoints.compliance = Some("http://127.0.0.1:1".to_string());
        let router = AgentRouter::new(
            None,
            AgentEndpointTable::resolve(&endpoints),
            Duration::from_secs(1),
        );
        let request = AgentRequest::new("fda question", "U123");
        let response = router.route(&request).await;
        assert!(!response.success);
        assert_eq!(response.message, DISPATCH_ERROR_MESSAGE);
        assert!(response.timestamp.is_some());
    }

    #[test]
    fn agent_request_serializes_wire_shape() {
        let request = AgentRequest::new("hi", "U1")
            .with_context("channel", "C1")
            .with_context("is_command", true);
        let v = serde_json::to_value(&request).expect("serialize");
        assert_eq!(v["message"], "hi");
        assert_eq!(v["user_id"], "U1");
        assert_eq!(v["context"]["channel"], "C1");
        assert_eq!(v["context"]["is_command"], true);
    }

    #[test]
    fn agent_response_parses_minimal_and_full_bodies() {
        let minimal: AgentResponse =
            serde_json::from_str(r#"{"success": true, "message": "hi"}"#).expect("parse");
        assert!(minimal.success);
        assert!(minimal.usage.is_none());

        let full: AgentResponse = serde_json::from_str(
            r#"{"success": true, "message": "hi", "agent": "compliance",
                "usage": {"total_tokens": 12, "cost": 0.003, "model": "gpt-4o"},
                "timestamp": "2025-01-01T00:00:00Z"}"#,
        )
        .expect("parse");
        assert_eq!(full.agent.as_deref(), Some("compliance"));
        assert_eq!(full.usage.as_ref().and_then(|u| u.total_tokens), Some(12));
    }
}
