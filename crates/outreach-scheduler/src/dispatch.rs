//! Action dispatch: turns a claimed schedule plus resolved content into one
//! channel adapter call. Supports: LinkedIn message, invitation, reaction,
//! comment, and email.

use std::sync::Arc;

use serde_json::{Value, json};

use outreach_core::traits::{AdapterResponse, ChannelAdapter, ChannelEndpoint, PostLookup};
use outreach_core::{AuthContext, CadenceStep, Schedule, StepAction, StepType};

use crate::content::ResolvedContent;

/// Adapter endpoint for a step type. `None` for unsupported types.
pub fn endpoint_for(step_type: &StepType) -> Option<ChannelEndpoint> {
    match step_type {
        StepType::LinkedinMessage => Some(ChannelEndpoint::LinkedinSendMessage),
        StepType::LinkedinConnect => Some(ChannelEndpoint::LinkedinSendInvitation),
        StepType::LinkedinLike => Some(ChannelEndpoint::LinkedinReactToPost),
        StepType::LinkedinComment => Some(ChannelEndpoint::LinkedinCommentOnPost),
        StepType::SendEmail => Some(ChannelEndpoint::EmailSend),
        StepType::Unsupported(_) => None,
    }
}

pub struct ActionDispatcher {
    adapter: Arc<dyn ChannelAdapter>,
    posts: Arc<dyn PostLookup>,
}

impl ActionDispatcher {
    pub fn new(adapter: Arc<dyn ChannelAdapter>, posts: Arc<dyn PostLookup>) -> Self {
        Self { adapter, posts }
    }

    /// Dispatch one step. Never fails: every problem is reported in the response.
    pub async fn dispatch(
        &self,
        ctx: &AuthContext,
        schedule: &Schedule,
        step: &CadenceStep,
        content: &ResolvedContent,
    ) -> AdapterResponse {
        let Some(endpoint) = endpoint_for(&step.step_type) else {
            return failure(format!("unsupported step type: {}", step.step_type));
        };

        let payload = match self.build_payload(ctx, schedule, step, content).await {
            Ok(p) => p,
            Err(reason) => return failure(reason),
        };

        tracing::debug!(
            schedule_id = %schedule.id,
            lead_id = %schedule.lead_id,
            endpoint = endpoint.as_str(),
            "Dispatching step"
        );

        match self.adapter.send(ctx, endpoint, &schedule.lead_id, &payload).await {
            Ok(resp) if resp.success => resp,
            Ok(resp) => AdapterResponse {
                success: false,
                error: Some(
                    resp.error
                        .clone()
                        .unwrap_or_else(|| format!("{} reported failure", endpoint.as_str())),
                ),
                data: resp.data,
            },
            Err(e) => failure(e.to_string()),
        }
    }

    async fn build_payload(
        &self,
        ctx: &AuthContext,
        schedule: &Schedule,
        step: &CadenceStep,
        content: &ResolvedContent,
    ) -> Result<Value, String> {
        let mut payload = json!({
            "lead_id": schedule.lead_id,
            "cadence_id": schedule.cadence_id,
            "step_id": step.id,
            // Lets the channel drop a replayed request.
            "idempotency_key": schedule.id,
        });

        match &step.config.action {
            StepAction::Message(_) => {
                let (_, body) = strip_subject(required_text(content, step)?);
                payload["message"] = json!(body);
            }
            StepAction::Connect { send_note, .. } => {
                // Invitations without a note never carry text, whatever was resolved.
                if let Some(text) = content.text().filter(|_| *send_note) {
                    let (_, note) = strip_subject(text);
                    if !note.is_empty() {
                        payload["note"] = json!(note);
                    }
                }
            }
            StepAction::Like { reaction, .. } => {
                payload["reaction"] = json!(reaction.as_str());
            }
            StepAction::Comment { .. } => {
                let (_, body) = strip_subject(required_text(content, step)?);
                payload["comment"] = json!(body);
            }
            StepAction::Email { .. } => {
                let (leaked_subject, body) = strip_subject(required_text(content, step)?);
                let subject = content
                    .subject
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .or(leaked_subject)
                    .unwrap_or_default();
                payload["subject"] = json!(subject);
                payload["body"] = json!(to_html(&body));
                payload["is_html"] = json!(true);
            }
            StepAction::Unsupported => {
                return Err(format!("unsupported step type: {}", step.step_type));
            }
        }
        if step.step_type.needs_post() {
            payload["post_url"] = json!(self.target_post(ctx, schedule, step).await?);
        }
        Ok(payload)
    }

    /// Configured post URL, or the lead's most recent post.
    async fn target_post(
        &self,
        ctx: &AuthContext,
        schedule: &Schedule,
        step: &CadenceStep,
    ) -> Result<String, String> {
        if let Some(url) = step.config.post_url().filter(|u| !u.trim().is_empty()) {
            return Ok(url.to_string());
        }
        match self
            .posts
            .latest_post(ctx, &schedule.lead_id, step.config.keyword_filter())
            .await
        {
            Ok(Some(post)) => Ok(post.url),
            Ok(None) => Err("no post found for lead".to_string()),
            Err(e) => Err(format!("post lookup failed: {e}")),
        }
    }
}

fn failure(error: String) -> AdapterResponse {
    AdapterResponse {
        success: false,
        error: Some(error),
        data: None,
    }
}

fn required_text<'a>(content: &'a ResolvedContent, step: &CadenceStep) -> Result<&'a str, String> {
    content
        .text()
        .ok_or_else(|| format!("empty content for {} step", step.step_type))
}

/// Split a leading `SUBJECT: ...` line off generated text.
pub fn strip_subject(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim_start();
    let first_line_end = trimmed.find('\n').unwrap_or(trimmed.len());
    let first_line = &trimmed[..first_line_end];
    let is_subject = first_line
        .get(..8)
        .is_some_and(|p| p.eq_ignore_ascii_case("subject:"));
    if !is_subject {
        return (None, text.trim().to_string());
    }
    let subject = first_line[8..].trim();
    let rest = trimmed[first_line_end..].trim();
    let subject = (!subject.is_empty()).then(|| subject.to_string());
    (subject, rest.to_string())
}

/// Minimal HTML for a plain-text email body. Text that already carries markup
/// is returned unchanged.
pub fn to_html(text: &str) -> String {
    if looks_like_html(text) {
        return text.to_string();
    }
    let normalized = text.replace("\r\n", "\n");
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in normalized.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("<br>"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("<br>"));
    }
    paragraphs
        .iter()
        .map(|p| format!("<p>{}</p>", escape_html(p).replace("&lt;br&gt;", "<br>")))
        .collect::<Vec<_>>()
        .join("")
}

fn looks_like_html(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["<p", "<br", "<div", "<html", "<body", "<table", "<ul", "<a ", "</"]
        .iter()
        .any(|tag| lower.contains(tag))
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentSource;
    use crate::testkit::{Fixture, FixedPosts, RecordingAdapter};
    use serde_json::json;

    fn text(body: &str) -> ResolvedContent {
        ResolvedContent {
            body: Some(body.into()),
            subject: None,
            source: ContentSource::Template,
        }
    }

    fn nothing() -> ResolvedContent {
        ResolvedContent {
            body: None,
            subject: None,
            source: ContentSource::Empty,
        }
    }

    #[test]
    fn test_strip_subject() {
        assert_eq!(
            strip_subject("SUBJECT: Hello\n\nBody text"),
            (Some("Hello".into()), "Body text".into())
        );
        assert_eq!(
            strip_subject("subject:Quick one\nLine"),
            (Some("Quick one".into()), "Line".into())
        );
        assert_eq!(strip_subject("  Just a body  "), (None, "Just a body".into()));
        assert_eq!(strip_subject("Subj"), (None, "Subj".into()));
    }

    #[test]
    fn test_to_html_paragraphs_and_breaks() {
        assert_eq!(
            to_html("Hi Ana,\nhope you're well.\n\nBest,\nSam"),
            "<p>Hi Ana,<br>hope you're well.</p><p>Best,<br>Sam</p>"
        );
        assert_eq!(to_html("a < b & c"), "<p>a &lt; b &amp; c</p>");
        let html = "<p>Already formatted</p>";
        assert_eq!(to_html(html), html);
    }

    #[tokio::test]
    async fn test_message_strips_leaked_subject() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinMessage, 0, 0, json!({}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let adapter = Arc::new(RecordingAdapter::ok());
        let d = ActionDispatcher::new(adapter.clone(), Arc::new(FixedPosts::none()));

        let resp = d
            .dispatch(&AuthContext::default(), &sched, &step, &text("SUBJECT: Hi\n\nHello Ana"))
            .await;
        assert!(resp.success);
        let calls = adapter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].endpoint, ChannelEndpoint::LinkedinSendMessage);
        assert_eq!(calls[0].lead_id, "lead-1");
        assert_eq!(calls[0].payload["message"], "Hello Ana");
        assert_eq!(calls[0].payload["idempotency_key"], "sch-1");
    }

    #[tokio::test]
    async fn test_plain_invitation_without_note() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinConnect, 0, 0, json!({}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let adapter = Arc::new(RecordingAdapter::ok());
        let d = ActionDispatcher::new(adapter.clone(), Arc::new(FixedPosts::none()));

        assert!(d.dispatch(&AuthContext::default(), &sched, &step, &nothing()).await.success);
        let calls = adapter.calls();
        assert_eq!(calls[0].endpoint, ChannelEndpoint::LinkedinSendInvitation);
        assert!(calls[0].payload.get("note").is_none());
    }

    #[tokio::test]
    async fn test_connect_note_follows_send_note() {
        let fx = Fixture::new();
        let adapter = Arc::new(RecordingAdapter::ok());
        let d = ActionDispatcher::new(adapter.clone(), Arc::new(FixedPosts::none()));
        let note = text("Hi, let's connect");

        let silent = fx.step(
            "s1",
            StepType::LinkedinConnect,
            0,
            0,
            json!({"send_note": false, "message_template": "Hi, let's connect"}),
        );
        let sched = fx.schedule("sch-1", &silent, "lead-1");
        assert!(d.dispatch(&AuthContext::default(), &sched, &silent, &note).await.success);

        let noted = fx.step(
            "s2",
            StepType::LinkedinConnect,
            0,
            1,
            json!({"send_note": true, "message_template": "Hi, let's connect"}),
        );
        let sched = fx.schedule("sch-2", &noted, "lead-2");
        assert!(d.dispatch(&AuthContext::default(), &sched, &noted, &note).await.success);

        let calls = adapter.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].lead_id, "lead-1");
        assert!(calls[0].payload.get("note").is_none());
        assert_eq!(calls[1].lead_id, "lead-2");
        assert_eq!(calls[1].payload["note"], "Hi, let's connect");
    }

    #[tokio::test]
    async fn test_like_uses_latest_post() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinLike, 0, 0, json!({"reaction": "celebrate"}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let adapter = Arc::new(RecordingAdapter::ok());
        let d = ActionDispatcher::new(
            adapter.clone(),
            Arc::new(FixedPosts::one("https://linkedin.example/posts/42")),
        );

        assert!(d.dispatch(&AuthContext::default(), &sched, &step, &nothing()).await.success);
        let calls = adapter.calls();
        assert_eq!(calls[0].payload["post_url"], "https://linkedin.example/posts/42");
        assert_eq!(calls[0].payload["reaction"], "celebrate");
    }

    #[tokio::test]
    async fn test_comment_without_any_post_fails_before_send() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinComment, 0, 0, json!({}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let adapter = Arc::new(RecordingAdapter::ok());
        let d = ActionDispatcher::new(adapter.clone(), Arc::new(FixedPosts::none()));

        let resp = d
            .dispatch(&AuthContext::default(), &sched, &step, &text("Nice one"))
            .await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("no post found for lead"));
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_email_gets_html_and_leaked_subject() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::SendEmail, 0, 0, json!({}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let adapter = Arc::new(RecordingAdapter::ok());
        let d = ActionDispatcher::new(adapter.clone(), Arc::new(FixedPosts::none()));

        let content = text("SUBJECT: Intro\n\nHi Ana,\nquick note.");
        assert!(d.dispatch(&AuthContext::default(), &sched, &step, &content).await.success);
        let payload = &adapter.calls()[0].payload;
        assert_eq!(payload["subject"], "Intro");
        assert_eq!(payload["body"], "<p>Hi Ana,<br>quick note.</p>");
    }

    #[tokio::test]
    async fn test_adapter_failure_is_data() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinMessage, 0, 0, json!({}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let d = ActionDispatcher::new(
            Arc::new(RecordingAdapter::failing("rate limited")),
            Arc::new(FixedPosts::none()),
        );
        let resp = d.dispatch(&AuthContext::default(), &sched, &step, &text("Hi")).await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_every_supported_type_has_an_endpoint() {
        for t in ["linkedin_message", "linkedin_connect", "linkedin_like", "linkedin_comment", "send_email"] {
            assert!(endpoint_for(&StepType::parse(t)).is_some(), "{t}");
        }
        assert!(endpoint_for(&StepType::parse("whatsapp_voice")).is_none());
    }
}
