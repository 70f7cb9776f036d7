//! Content-generation provider over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use outreach_core::config::ContentConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{ContentProvider, GenerateRequest, GeneratedContent};
use outreach_core::AuthContext;

use crate::client::JsonClient;

pub struct HttpContentProvider {
    client: JsonClient,
    endpoint: String,
}

impl HttpContentProvider {
    pub fn new(config: &ContentConfig) -> Self {
        Self {
            client: JsonClient::new(
                &config.endpoint,
                &config.api_key,
                Duration::from_secs(config.timeout_secs),
            ),
            endpoint: config.endpoint.clone(),
        }
    }
}

/// Request body sent to the generator.
pub fn request_body(req: &GenerateRequest) -> Value {
    let mut body = json!({
        "lead_id": req.lead_id,
        "step_type": req.step_type.as_str(),
        "tone": req.tone,
        "language": req.language,
        "use_research": req.use_research,
    });
    if let Some(t) = &req.template {
        body["template"] = json!(t);
    }
    if let Some(p) = &req.prompt_ref {
        body["prompt_id"] = json!(p);
    }
    if !req.examples.is_empty() {
        body["examples"] = json!(req.examples);
    }
    body
}

/// Pull `{message, subject?}` out of a reply, accepting a `data` envelope.
pub fn parse_generated(body: &Value) -> Option<GeneratedContent> {
    let payload = body.get("data").filter(|d| d.is_object()).unwrap_or(body);
    let message = payload
        .get("message")
        .or_else(|| payload.get("text"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())?;
    let subject = payload
        .get("subject")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    Some(GeneratedContent {
        message: message.to_string(),
        subject,
    })
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn generate(&self, ctx: &AuthContext, req: &GenerateRequest) -> Result<GeneratedContent> {
        let reply = self
            .client
            .post(ctx, &self.endpoint, &request_body(req))
            .await
            .map_err(|e| OutreachError::Provider(format!("content provider unreachable: {e}")))?;
        if !reply.is_success() {
            return Err(OutreachError::Provider(reply.error_text()));
        }
        if reply.body.get("success").and_then(Value::as_bool) == Some(false) {
            let err = reply
                .body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("generation refused");
            return Err(OutreachError::Provider(err.to_string()));
        }
        parse_generated(&reply.body)
            .ok_or_else(|| OutreachError::Provider("content provider returned no message".into()))
    }
}
