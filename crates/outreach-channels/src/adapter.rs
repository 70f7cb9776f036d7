//! Channel service adapter: one POST endpoint per step type.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use outreach_core::config::ChannelsConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{AdapterResponse, ChannelAdapter, ChannelEndpoint};
use outreach_core::AuthContext;

use crate::client::{JsonClient, JsonReply};

pub struct HttpChannelAdapter {
    client: JsonClient,
    config: ChannelsConfig,
}

impl HttpChannelAdapter {
    pub fn new(config: &ChannelsConfig) -> Self {
        Self {
            client: JsonClient::new(
                &config.base_url,
                &config.api_key,
                Duration::from_secs(config.timeout_secs),
            ),
            config: config.clone(),
        }
    }

    pub fn endpoint_url(&self, endpoint: ChannelEndpoint) -> String {
        self.client.url(&self.config.path_for(endpoint))
    }
}

/// Normalize a channel reply into `{success, error, data}`.
pub fn normalize(reply: &JsonReply) -> AdapterResponse {
    if !reply.is_success() {
        return AdapterResponse {
            success: false,
            error: Some(reply.error_text()),
            data: (!reply.body.is_null()).then(|| reply.body.clone()),
        };
    }
    match reply.body.get("success").and_then(Value::as_bool) {
        Some(success) => AdapterResponse {
            success,
            error: reply
                .body
                .get("error")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| (!success).then(|| "channel reported failure".to_string())),
            data: reply.body.get("data").cloned().filter(|d| !d.is_null()),
        },
        // A 2xx without an envelope is a success carrying the whole body.
        None => AdapterResponse {
            success: true,
            error: None,
            data: (!reply.body.is_null()).then(|| reply.body.clone()),
        },
    }
}

#[async_trait]
impl ChannelAdapter for HttpChannelAdapter {
    async fn send(
        &self,
        ctx: &AuthContext,
        endpoint: ChannelEndpoint,
        lead_id: &str,
        payload: &Value,
    ) -> Result<AdapterResponse> {
        let path = self.config.path_for(endpoint);
        let reply = self
            .client
            .post(ctx, &path, payload)
            .await
            .map_err(|e| OutreachError::Channel(format!("{} request failed: {e}", endpoint.as_str())))?;
        let resp = normalize(&reply);
        if resp.success {
            tracing::info!(endpoint = endpoint.as_str(), lead_id, "✅ Channel call succeeded");
        } else {
            tracing::warn!(
                endpoint = endpoint.as_str(),
                lead_id,
                error = resp.error.as_deref().unwrap_or(""),
                "Channel call failed"
            );
        }
        Ok(resp)
    }
}
