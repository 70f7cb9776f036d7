//! Cadence automation lifecycle: enrollment, bulk scheduling at start, and
//! out-of-band cancellation of a lead.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use outreach_core::config::QueueConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::{
    AutomationMode, CadenceLead, CadenceStatus, LeadStatus, Schedule, ScheduleStatus,
};

use crate::persistence::CadenceDb;
use crate::timezone;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationSummary {
    pub cadence_id: String,
    pub leads: usize,
    pub schedules_created: usize,
    /// Open schedules replaced by this start.
    pub superseded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelSummary {
    pub cadence_id: String,
    pub lead_id: String,
    pub status: LeadStatus,
    pub schedules_canceled: usize,
}

pub struct CadenceAutomation {
    db: Arc<CadenceDb>,
    same_day_grace: Duration,
    stagger: Duration,
}

impl CadenceAutomation {
    pub fn new(db: Arc<CadenceDb>, queue: &QueueConfig) -> Self {
        Self {
            db,
            same_day_grace: Duration::minutes(queue.same_day_grace_minutes.max(0)),
            stagger: Duration::seconds(queue.automation_stagger_secs.max(0)),
        }
    }

    /// Enroll a lead at the first step. Re-enrolling resets progress.
    pub fn enroll_lead(&self, cadence_id: &str, lead_id: &str) -> Result<CadenceLead> {
        self.db.get_cadence(cadence_id)?;
        let steps = self.db.list_steps(cadence_id)?;
        let lead = CadenceLead {
            cadence_id: cadence_id.to_string(),
            lead_id: lead_id.to_string(),
            current_step_id: steps.first().map(|s| s.id.clone()),
            status: LeadStatus::Active,
        };
        self.db.upsert_cadence_lead(&lead)?;
        tracing::info!(cadence_id, lead_id, "➕ Lead enrolled");
        Ok(lead)
    }

    /// Create one schedule per step for every active lead of an automated cadence.
    pub fn start_automation(&self, cadence_id: &str, now: DateTime<Utc>) -> Result<AutomationSummary> {
        let cadence = self.db.get_cadence(cadence_id)?;
        if cadence.automation_mode != AutomationMode::Automated {
            return Err(OutreachError::Invalid(format!(
                "cadence {cadence_id} is not automated"
            )));
        }
        let steps = self.db.list_steps(cadence_id)?;
        let Some(first) = steps.first() else {
            return Err(OutreachError::Invalid(format!("cadence {cadence_id} has no steps")));
        };

        let zone = timezone::zone_or_utc(&cadence.timezone);
        let leads: Vec<_> = self
            .db
            .list_cadence_leads(cadence_id)?
            .into_iter()
            .filter(|l| !l.status.is_terminal())
            .collect();

        let mut created = 0;
        let mut superseded = 0;
        for (i, lead) in leads.iter().enumerate() {
            let staggered = now + self.stagger * i as i32;
            for step in &steps {
                let base = match step.config.scheduled_time {
                    Some(_) => now,
                    None => staggered,
                };
                let at = timezone::fire_time(
                    base,
                    zone,
                    step.config.scheduled_time,
                    step.day_offset,
                    self.same_day_grace,
                );
                let schedule = Schedule {
                    id: uuid::Uuid::new_v4().to_string(),
                    cadence_id: cadence.id.clone(),
                    cadence_step_id: step.id.clone(),
                    lead_id: lead.lead_id.clone(),
                    owner_id: cadence.owner_id.clone(),
                    scheduled_at: at,
                    timezone: cadence.timezone.clone(),
                    status: ScheduleStatus::Scheduled,
                    last_error: None,
                    message_template_text: step.config.message().and_then(|m| m.template.clone()),
                    message_rendered_text: None,
                };
                superseded += self.db.replace_open_schedule(&schedule)?;
                self.db.ensure_instance_pending(&step.id, &lead.lead_id)?;
                created += 1;
            }
            self.db.upsert_cadence_lead(&CadenceLead {
                cadence_id: cadence.id.clone(),
                lead_id: lead.lead_id.clone(),
                current_step_id: Some(first.id.clone()),
                status: LeadStatus::Scheduled,
            })?;
        }

        self.db.set_cadence_status(cadence_id, CadenceStatus::Active)?;
        tracing::info!(
            cadence_id,
            leads = leads.len(),
            schedules = created,
            superseded,
            "🚀 Automation started"
        );
        Ok(AutomationSummary {
            cadence_id: cadence.id,
            leads: leads.len(),
            schedules_created: created,
            superseded,
        })
    }

    /// Pull a lead out of a cadence. Schedules already being processed finish normally.
    pub fn cancel_lead(&self, cadence_id: &str, lead_id: &str, status: LeadStatus) -> Result<CancelSummary> {
        if !matches!(status, LeadStatus::Replied | LeadStatus::Removed) {
            return Err(OutreachError::Invalid(format!(
                "cancel status must be replied or removed, got {}",
                status.as_str()
            )));
        }
        let lead = self
            .db
            .get_cadence_lead(cadence_id, lead_id)?
            .ok_or_else(|| OutreachError::NotFound(format!("cadence lead {cadence_id}/{lead_id}")))?;

        let canceled = self
            .db
            .cancel_open_schedules(cadence_id, lead_id, status.as_str())?;
        self.db
            .update_lead_progress(cadence_id, lead_id, lead.current_step_id.as_deref(), status)?;
        tracing::info!(cadence_id, lead_id, canceled, status = status.as_str(), "🛑 Lead canceled");
        Ok(CancelSummary {
            cadence_id: cadence_id.to_string(),
            lead_id: lead_id.to_string(),
            status,
            schedules_canceled: canceled,
        })
    }
}
