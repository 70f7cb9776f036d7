//! Latest-post lookup on the channel service.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use outreach_core::config::ChannelsConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{LeadPost, PostLookup};
use outreach_core::AuthContext;

use crate::client::JsonClient;

pub struct HttpPostLookup {
    client: JsonClient,
    path: String,
}

impl HttpPostLookup {
    pub fn new(config: &ChannelsConfig) -> Self {
        Self {
            client: JsonClient::new(
                &config.base_url,
                &config.api_key,
                Duration::from_secs(config.timeout_secs),
            ),
            path: config.latest_post_path.clone(),
        }
    }
}

/// Accepts `{post: {url, text}}`, `{data: {...}}` or a bare `{url, text}`.
pub fn parse_post(body: &Value) -> Option<LeadPost> {
    let post = ["post", "data"]
        .iter()
        .find_map(|k| body.get(*k))
        .unwrap_or(body);
    let url = post
        .get("url")
        .or_else(|| post.get("post_url"))
        .and_then(Value::as_str)
        .filter(|u| !u.trim().is_empty())?;
    Some(LeadPost {
        url: url.to_string(),
        text: post.get("text").and_then(Value::as_str).map(String::from),
    })
}

#[async_trait]
impl PostLookup for HttpPostLookup {
    async fn latest_post(
        &self,
        ctx: &AuthContext,
        lead_id: &str,
        keyword: Option<&str>,
    ) -> Result<Option<LeadPost>> {
        let body = json!({ "lead_id": lead_id, "keyword": keyword });
        let reply = self
            .client
            .post(ctx, &self.path, &body)
            .await
            .map_err(|e| OutreachError::Channel(format!("post lookup failed: {e}")))?;
        if reply.status == 404 {
            return Ok(None);
        }
        if !reply.is_success() {
            return Err(OutreachError::Channel(reply.error_text()));
        }
        let post = parse_post(&reply.body);
        tracing::debug!(lead_id, found = post.is_some(), "Latest post lookup");
        Ok(post)
    }
}
