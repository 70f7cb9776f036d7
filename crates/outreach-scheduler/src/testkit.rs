//! In-memory fixtures and collaborator fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{
    AdapterResponse, ChannelAdapter, ChannelEndpoint, ContentProvider, GenerateRequest,
    GeneratedContent, LeadPost, PostLookup,
};
use outreach_core::{
    AuthContext, AutomationMode, Cadence, CadenceLead, CadenceStatus, CadenceStep, LeadStatus,
    Schedule, ScheduleStatus, StepConfig, StepType,
};

use crate::persistence::CadenceDb;

pub const CADENCE_ID: &str = "cad-1";
pub const OWNER_ID: &str = "owner-1";

/// 2024-03-05T08:00:00-05:00
pub fn enrollment_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 13, 0, 0).unwrap()
}

pub struct Fixture {
    pub db: Arc<CadenceDb>,
    pub cadence: Cadence,
}

impl Fixture {
    /// Automated cadence in America/New_York.
    pub fn new() -> Self {
        Self::with_mode(AutomationMode::Automated)
    }

    pub fn with_mode(mode: AutomationMode) -> Self {
        let db = Arc::new(CadenceDb::open_in_memory().unwrap());
        let cadence = Cadence {
            id: CADENCE_ID.into(),
            name: "Spring outreach".into(),
            owner_id: OWNER_ID.into(),
            automation_mode: mode,
            timezone: "America/New_York".into(),
            status: CadenceStatus::Active,
        };
        db.upsert_cadence(&cadence).unwrap();
        Self { db, cadence }
    }

    pub fn step(&self, id: &str, step_type: StepType, day: i64, order: i64, config: Value) -> CadenceStep {
        let step = CadenceStep {
            id: id.into(),
            cadence_id: CADENCE_ID.into(),
            config: StepConfig::from_json(&step_type, &config),
            step_type,
            step_label: id.into(),
            day_offset: day,
            order_in_day: order,
        };
        self.db.upsert_step(&step).unwrap();
        step
    }

    /// Schedule for `step` due at enrollment time. Not inserted.
    pub fn schedule(&self, id: &str, step: &CadenceStep, lead_id: &str) -> Schedule {
        Schedule {
            id: id.into(),
            cadence_id: CADENCE_ID.into(),
            cadence_step_id: step.id.clone(),
            lead_id: lead_id.into(),
            owner_id: OWNER_ID.into(),
            scheduled_at: enrollment_time(),
            timezone: self.cadence.timezone.clone(),
            status: ScheduleStatus::Scheduled,
            last_error: None,
            message_template_text: None,
            message_rendered_text: None,
        }
    }

    pub fn insert_schedule(&self, id: &str, step: &CadenceStep, lead_id: &str) -> Schedule {
        let s = self.schedule(id, step, lead_id);
        self.db.insert_schedule(&s).unwrap();
        s
    }

    pub fn enroll(&self, lead_id: &str, current: &CadenceStep, status: LeadStatus) {
        self.db
            .upsert_cadence_lead(&CadenceLead {
                cadence_id: CADENCE_ID.into(),
                lead_id: lead_id.into(),
                current_step_id: Some(current.id.clone()),
                status,
            })
            .unwrap();
    }

    pub fn lead(&self, lead_id: &str) -> CadenceLead {
        self.db.get_cadence_lead(CADENCE_ID, lead_id).unwrap().unwrap()
    }

    pub fn status_of(&self, schedule_id: &str) -> ScheduleStatus {
        self.db.get_schedule(schedule_id).unwrap().unwrap().status
    }
}

// ─── Content provider ─────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Fail,
    Text(String, Option<String>),
}

pub struct ScriptedProvider {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::new(vec![], Reply::Fail)
    }

    pub fn always(text: &str) -> Self {
        Self::new(vec![], Reply::Text(text.into(), None))
    }

    pub fn always_with_subject(text: &str, subject: &str) -> Self {
        Self::new(vec![], Reply::Text(text.into(), Some(subject.into())))
    }

    pub fn fail_then(text: &str) -> Self {
        Self::new(vec![Reply::Fail], Reply::Text(text.into(), None))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn generate(&self, _ctx: &AuthContext, req: &GenerateRequest) -> Result<GeneratedContent> {
        self.requests.lock().unwrap().push(req.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Fail => Err(OutreachError::Provider("provider unavailable".into())),
            Reply::Text(message, subject) => Ok(GeneratedContent { message, subject }),
        }
    }
}

// ─── Channel adapter ──────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SentCall {
    pub endpoint: ChannelEndpoint,
    pub lead_id: String,
    pub payload: Value,
    pub ctx: AuthContext,
}

pub struct RecordingAdapter {
    calls: Mutex<Vec<SentCall>>,
    failure: Option<String>,
}

impl RecordingAdapter {
    pub fn ok() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Some(error.into()),
        }
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    async fn send(
        &self,
        ctx: &AuthContext,
        endpoint: ChannelEndpoint,
        lead_id: &str,
        payload: &Value,
    ) -> Result<AdapterResponse> {
        self.calls.lock().unwrap().push(SentCall {
            endpoint,
            lead_id: lead_id.into(),
            payload: payload.clone(),
            ctx: ctx.clone(),
        });
        Ok(match &self.failure {
            Some(err) => AdapterResponse {
                success: false,
                error: Some(err.clone()),
                data: None,
            },
            None => AdapterResponse {
                success: true,
                error: None,
                data: Some(json!({"id": format!("ext-{lead_id}")})),
            },
        })
    }
}

// ─── Post lookup ──────────────────────────────────────────

pub struct FixedPosts(pub Option<LeadPost>);

impl FixedPosts {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn one(url: &str) -> Self {
        Self(Some(LeadPost {
            url: url.into(),
            text: Some("Shipping our Q2 roadmap".into()),
        }))
    }
}

#[async_trait]
impl PostLookup for FixedPosts {
    async fn latest_post(
        &self,
        _ctx: &AuthContext,
        _lead_id: &str,
        _keyword: Option<&str>,
    ) -> Result<Option<LeadPost>> {
        Ok(self.0.clone())
    }
}
