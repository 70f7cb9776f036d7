//! Shared JSON-over-HTTP client with caller-context auth.

use std::time::Duration;

use outreach_core::AuthContext;
use serde_json::Value;

/// Raw reply: HTTP status plus the decoded body (`Null` when empty or not JSON).
#[derive(Debug, Clone)]
pub struct JsonReply {
    pub status: u16,
    pub body: Value,
    pub raw: String,
}

impl JsonReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Best error text the body offers.
    pub fn error_text(&self) -> String {
        let detail = self
            .body
            .get("error")
            .and_then(|e| e.as_str().map(String::from).or_else(|| e.get("message")?.as_str().map(String::from)))
            .unwrap_or_else(|| self.raw.chars().take(300).collect());
        format!("HTTP {}: {}", self.status, detail)
    }
}

/// POSTs JSON to `base_url + path`.
pub struct JsonClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl JsonClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "HTTP client build failed, using defaults without timeout");
                reqwest::Client::new()
            });
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Authorization value: the caller's token first, then the service key.
    pub fn authorization(&self, ctx: &AuthContext) -> Option<String> {
        ctx.authorization().or_else(|| {
            (!self.api_key.is_empty()).then(|| format!("Bearer {}", self.api_key))
        })
    }

    pub async fn post(&self, ctx: &AuthContext, path: &str, body: &Value) -> Result<JsonReply, reqwest::Error> {
        let url = self.url(path);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(auth) = self.authorization(ctx) {
            req = req.header("Authorization", auth);
        }
        if let Some(org) = &ctx.org_id {
            req = req.header("X-Org-Id", org);
        }
        if let Some(owner) = &ctx.owner_id {
            req = req.header("X-Owner-Id", owner);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let raw = resp.text().await.unwrap_or_default();
        let body = serde_json::from_str(&raw).unwrap_or(Value::Null);
        tracing::debug!(url = %url, status, "Collaborator call finished");
        Ok(JsonReply { status, body, raw })
    }
}
