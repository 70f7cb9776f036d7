//! Content Resolver: decides what text (and email subject) a step sends.
//!
//! Priority: pre-rendered text on the schedule, then the step's AI prompt
//! (bounded retries, template fallback), then the static template, then a
//! single best-effort generation for steps that must carry text.

use std::sync::Arc;
use std::time::Duration;

use outreach_core::config::ContentConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{ContentProvider, GenerateRequest, GeneratedContent};
use outreach_core::{AuthContext, CadenceStep, InstanceStatus, MessageConfig, Schedule, StepAction};

use crate::persistence::CadenceDb;

/// Retry and default-style settings for generation.
#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub default_tone: String,
    pub default_language: String,
}

impl From<&ContentConfig> for ContentSettings {
    fn from(cfg: &ContentConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            default_tone: cfg.default_tone.clone(),
            default_language: cfg.default_language.clone(),
        }
    }
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self::from(&ContentConfig::default())
    }
}

/// Where the resolved text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    PreRendered,
    Generated,
    Template,
    AutoGenerated,
    /// Nothing to send; only valid for steps that tolerate empty content.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContent {
    pub body: Option<String>,
    pub subject: Option<String>,
    pub source: ContentSource,
}

impl ResolvedContent {
    fn empty() -> Self {
        Self {
            body: None,
            subject: None,
            source: ContentSource::Empty,
        }
    }

    /// Text to send, trimmed; `None` when there is none.
    pub fn text(&self) -> Option<&str> {
        self.body.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

pub struct ContentResolver {
    provider: Arc<dyn ContentProvider>,
    db: Arc<CadenceDb>,
    settings: ContentSettings,
}

impl ContentResolver {
    pub fn new(provider: Arc<dyn ContentProvider>, db: Arc<CadenceDb>, settings: ContentSettings) -> Self {
        Self {
            provider,
            db,
            settings,
        }
    }

    /// Resolve content for one claimed schedule.
    ///
    /// `Err(Content)` is a hard failure: the step needs text and none could be produced.
    pub async fn resolve(
        &self,
        ctx: &AuthContext,
        schedule: &Schedule,
        step: &CadenceStep,
    ) -> Result<ResolvedContent> {
        let configured_subject = match &step.config.action {
            StepAction::Email { subject, .. } => subject.clone(),
            StepAction::Connect { send_note: false, .. } => {
                // Plain invitation: nothing to render or generate.
                return Ok(ResolvedContent::empty());
            }
            _ => None,
        };

        if let Some(text) = non_empty(schedule.message_rendered_text.as_deref()) {
            return Ok(ResolvedContent {
                body: Some(text.to_string()),
                subject: configured_subject,
                source: ContentSource::PreRendered,
            });
        }

        let Some(msg) = step.config.message() else {
            return Ok(ResolvedContent::empty());
        };
        let template = non_empty(schedule.message_template_text.as_deref())
            .or_else(|| non_empty(msg.template.as_deref()))
            .map(String::from);

        if msg.has_prompt() {
            match self.generate_with_retry(ctx, schedule, step, msg).await {
                Ok(generated) => {
                    return Ok(self.accept(schedule, step, generated, configured_subject, ContentSource::Generated));
                }
                Err(e) => {
                    if let Some(text) = template {
                        tracing::warn!(
                            schedule_id = %schedule.id,
                            error = %e,
                            "Generation failed, falling back to template"
                        );
                        return Ok(template_content(text, configured_subject));
                    }
                    return self.give_up(step, e);
                }
            }
        }

        if let Some(text) = template {
            return Ok(template_content(text, configured_subject));
        }

        if !step.config.requires_content() {
            return Ok(ResolvedContent::empty());
        }

        // No prompt and no template: one attempt with house defaults.
        let req = self.request(schedule, step, msg, None);
        match self.provider.generate(ctx, &req).await {
            Ok(generated) if !generated.message.trim().is_empty() => Ok(self.accept(
                schedule,
                step,
                generated,
                configured_subject,
                ContentSource::AutoGenerated,
            )),
            Ok(_) => self.give_up(step, OutreachError::Content("provider returned empty text".into())),
            Err(e) => self.give_up(step, e),
        }
    }

    async fn generate_with_retry(
        &self,
        ctx: &AuthContext,
        schedule: &Schedule,
        step: &CadenceStep,
        msg: &MessageConfig,
    ) -> Result<GeneratedContent> {
        let req = self.request(schedule, step, msg, msg.ai_prompt_id.clone());
        let mut last_err = OutreachError::Content("no generation attempted".into());
        for attempt in 1..=self.settings.max_attempts {
            match self.provider.generate(ctx, &req).await {
                Ok(generated) if !generated.message.trim().is_empty() => return Ok(generated),
                Ok(_) => last_err = OutreachError::Content("provider returned empty text".into()),
                Err(e) => last_err = e,
            }
            tracing::warn!(
                schedule_id = %schedule.id,
                attempt,
                max_attempts = self.settings.max_attempts,
                error = %last_err,
                "Content generation attempt failed"
            );
            if attempt < self.settings.max_attempts && !self.settings.retry_backoff.is_zero() {
                tokio::time::sleep(self.settings.retry_backoff).await;
            }
        }
        Err(last_err)
    }

    fn request(
        &self,
        schedule: &Schedule,
        step: &CadenceStep,
        msg: &MessageConfig,
        prompt_ref: Option<String>,
    ) -> GenerateRequest {
        GenerateRequest {
            lead_id: schedule.lead_id.clone(),
            step_type: step.step_type.clone(),
            template: msg.template.clone(),
            prompt_ref,
            tone: msg.tone.clone().unwrap_or_else(|| self.settings.default_tone.clone()),
            language: msg
                .language
                .clone()
                .unwrap_or_else(|| self.settings.default_language.clone()),
            use_research: msg.use_research,
            examples: msg.examples.clone(),
        }
    }

    /// Persist generated text on the instance and build the result.
    fn accept(
        &self,
        schedule: &Schedule,
        step: &CadenceStep,
        generated: GeneratedContent,
        configured_subject: Option<String>,
        source: ContentSource,
    ) -> ResolvedContent {
        if let Err(e) = self.db.record_instance(
            &step.id,
            &schedule.lead_id,
            InstanceStatus::Generated,
            Some(&generated.message),
            None,
            None,
        ) {
            tracing::warn!(schedule_id = %schedule.id, error = %e, "Could not persist generated text");
        }
        ResolvedContent {
            subject: configured_subject.or(generated.subject),
            body: Some(generated.message),
            source,
        }
    }

    fn give_up(&self, step: &CadenceStep, cause: OutreachError) -> Result<ResolvedContent> {
        if step.config.tolerates_empty_content() {
            tracing::info!(step_id = %step.id, error = %cause, "Proceeding without content");
            return Ok(ResolvedContent::empty());
        }
        Err(OutreachError::Content(format!(
            "no content for {} step: {cause}",
            step.step_type
        )))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|t| !t.trim().is_empty())
}

fn template_content(text: String, subject: Option<String>) -> ResolvedContent {
    ResolvedContent {
        body: Some(text),
        subject,
        source: ContentSource::Template,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{Fixture, ScriptedProvider};
    use outreach_core::StepType;
    use serde_json::json;

    fn resolver(fx: &Fixture, provider: Arc<ScriptedProvider>, attempts: u32) -> ContentResolver {
        ContentResolver::new(
            provider,
            fx.db.clone(),
            ContentSettings {
                max_attempts: attempts,
                retry_backoff: Duration::ZERO,
                default_tone: "professional".into(),
                default_language: "en".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_pre_rendered_text_wins() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinMessage, 0, 0, json!({"ai_prompt_id": "p1"}));
        let mut sched = fx.schedule("sch-1", &step, "lead-1");
        sched.message_rendered_text = Some("Already written".into());
        let provider = Arc::new(ScriptedProvider::failing());

        let out = resolver(&fx, provider.clone(), 2)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap();
        assert_eq!(out.source, ContentSource::PreRendered);
        assert_eq!(out.text(), Some("Already written"));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_connect_without_note_resolves_empty() {
        let fx = Fixture::new();
        let provider = Arc::new(ScriptedProvider::always("AI note"));
        let r = resolver(&fx, provider.clone(), 2);

        let templated = fx.step(
            "s1",
            StepType::LinkedinConnect,
            0,
            0,
            json!({"send_note": false, "message_template": "Hi, let's connect"}),
        );
        let mut sched = fx.schedule("sch-1", &templated, "lead-1");
        sched.message_template_text = Some("Hi, let's connect".into());
        sched.message_rendered_text = Some("Hi, let's connect".into());
        let out = r.resolve(&AuthContext::default(), &sched, &templated).await.unwrap();
        assert_eq!(out.source, ContentSource::Empty);
        assert_eq!(out.text(), None);

        let prompted = fx.step(
            "s2",
            StepType::LinkedinConnect,
            0,
            1,
            json!({"send_note": false, "ai_prompt_id": "p1"}),
        );
        let sched = fx.schedule("sch-2", &prompted, "lead-1");
        let out = r.resolve(&AuthContext::default(), &sched, &prompted).await.unwrap();
        assert_eq!(out.source, ContentSource::Empty);
        assert_eq!(provider.calls(), 0);
        assert!(fx.db.get_instance("s2", "lead-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_with_note_uses_template() {
        let fx = Fixture::new();
        let step = fx.step(
            "s1",
            StepType::LinkedinConnect,
            0,
            0,
            json!({"send_note": true, "message_template": "Hi, let's connect"}),
        );
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let out = resolver(&fx, Arc::new(ScriptedProvider::failing()), 2)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap();
        assert_eq!(out.source, ContentSource::Template);
        assert_eq!(out.text(), Some("Hi, let's connect"));
    }

    #[tokio::test]
    async fn test_prompt_retries_then_uses_template() {
        let fx = Fixture::new();
        let step = fx.step(
            "s1",
            StepType::LinkedinMessage,
            0,
            0,
            json!({"ai_prompt_id": "p1", "message_template": "Hi there"}),
        );
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let provider = Arc::new(ScriptedProvider::failing());

        let out = resolver(&fx, provider.clone(), 2)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(out.source, ContentSource::Template);
        assert_eq!(out.text(), Some("Hi there"));
    }

    #[tokio::test]
    async fn test_prompt_second_attempt_succeeds_and_marks_generated() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinMessage, 0, 0, json!({"ai_prompt_id": "p1"}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let provider = Arc::new(ScriptedProvider::fail_then("Generated hello"));

        let out = resolver(&fx, provider.clone(), 2)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(out.source, ContentSource::Generated);
        let inst = fx.db.get_instance("s1", "lead-1").unwrap().unwrap();
        assert_eq!(inst.status, InstanceStatus::Generated);
        assert_eq!(inst.message_rendered_text.as_deref(), Some("Generated hello"));
        assert_eq!(provider.last_request().unwrap().prompt_ref.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_prompt_failure_without_template_is_hard_failure() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::SendEmail, 0, 0, json!({"ai_prompt_id": "p1"}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let err = resolver(&fx, Arc::new(ScriptedProvider::failing()), 2)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap_err();
        assert!(matches!(err, OutreachError::Content(_)));
    }

    #[tokio::test]
    async fn test_auto_generates_once_with_defaults() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinComment, 0, 0, json!({}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let provider = Arc::new(ScriptedProvider::always("Great post!"));

        let out = resolver(&fx, provider.clone(), 2)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap();
        assert_eq!(out.source, ContentSource::AutoGenerated);
        let req = provider.last_request().unwrap();
        assert_eq!(req.tone, "professional");
        assert_eq!(req.language, "en");
        assert!(req.prompt_ref.is_none());
    }

    #[tokio::test]
    async fn test_auto_generate_failure_tolerated_for_connect_note() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinConnect, 0, 0, json!({"send_note": true}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let provider = Arc::new(ScriptedProvider::failing());

        let out = resolver(&fx, provider.clone(), 2)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);
        assert_eq!(out.source, ContentSource::Empty);
    }

    #[tokio::test]
    async fn test_connect_without_note_needs_nothing() {
        let fx = Fixture::new();
        let step = fx.step("s1", StepType::LinkedinConnect, 0, 0, json!({}));
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let provider = Arc::new(ScriptedProvider::always("unused"));

        let out = resolver(&fx, provider.clone(), 2)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap();
        assert_eq!(out, ResolvedContent::empty());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_email_subject_prefers_step_config() {
        let fx = Fixture::new();
        let step = fx.step(
            "s1",
            StepType::SendEmail,
            0,
            0,
            json!({"ai_prompt_id": "p1", "subject": "Quick question"}),
        );
        let sched = fx.schedule("sch-1", &step, "lead-1");
        let provider = Arc::new(ScriptedProvider::always_with_subject("Body", "Generated subject"));

        let out = resolver(&fx, provider, 1)
            .resolve(&AuthContext::default(), &sched, &step)
            .await
            .unwrap();
        assert_eq!(out.subject.as_deref(), Some("Quick question"));
    }
}
