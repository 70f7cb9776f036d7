//! Collaborator traits: the engine's only view of the outside world.
//!
//! Content generation, channel delivery, post lookup and activity logging are
//! all black boxes behind these seams; HTTP implementations live in
//! `outreach-channels`, fakes live next to the tests that need them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AuthContext;
use crate::error::Result;
use crate::types::StepType;

// ─── Content generation ───────────────────────────────────

/// Input to the external content provider.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub lead_id: String,
    pub step_type: StepType,
    pub template: Option<String>,
    pub prompt_ref: Option<String>,
    pub tone: String,
    pub language: String,
    pub use_research: bool,
    pub examples: Vec<String>,
}

/// Text produced by the content provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub message: String,
    #[serde(default)]
    pub subject: Option<String>,
}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn generate(&self, ctx: &AuthContext, req: &GenerateRequest) -> Result<GeneratedContent>;
}

// ─── Channel delivery ─────────────────────────────────────

/// External endpoint a step is delivered through. One per supported step type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEndpoint {
    LinkedinSendMessage,
    LinkedinSendInvitation,
    LinkedinReactToPost,
    LinkedinCommentOnPost,
    EmailSend,
}

impl ChannelEndpoint {
    /// Default path relative to the channel service base URL.
    pub fn default_path(&self) -> &'static str {
        match self {
            ChannelEndpoint::LinkedinSendMessage => "/linkedin/send-message",
            ChannelEndpoint::LinkedinSendInvitation => "/linkedin/send-invitation",
            ChannelEndpoint::LinkedinReactToPost => "/linkedin/react-to-post",
            ChannelEndpoint::LinkedinCommentOnPost => "/linkedin/comment-on-post",
            ChannelEndpoint::EmailSend => "/email/send",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelEndpoint::LinkedinSendMessage => "linkedin_send_message",
            ChannelEndpoint::LinkedinSendInvitation => "linkedin_send_invitation",
            ChannelEndpoint::LinkedinReactToPost => "linkedin_react_to_post",
            ChannelEndpoint::LinkedinCommentOnPost => "linkedin_comment_on_post",
            ChannelEndpoint::EmailSend => "email_send",
        }
    }
}

/// Raw answer from a channel adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Deliver one payload. `Err` means the call itself failed (transport,
    /// decoding); an `Ok` response may still report `success: false`.
    async fn send(
        &self,
        ctx: &AuthContext,
        endpoint: ChannelEndpoint,
        lead_id: &str,
        payload: &Value,
    ) -> Result<AdapterResponse>;
}

// ─── Post lookup ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadPost {
    pub url: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[async_trait]
pub trait PostLookup: Send + Sync {
    /// Most recent post by the lead, optionally restricted to posts containing `keyword`.
    async fn latest_post(
        &self,
        ctx: &AuthContext,
        lead_id: &str,
        keyword: Option<&str>,
    ) -> Result<Option<LeadPost>>;
}

// ─── Activity log ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub owner_id: String,
    pub cadence_id: String,
    pub step_id: Option<String>,
    pub lead_id: String,
    pub action: String,
    pub status: String,
    pub details: Value,
}

#[async_trait]
pub trait ActivityLogger: Send + Sync {
    async fn log(&self, entry: ActivityEntry) -> Result<()>;
}
