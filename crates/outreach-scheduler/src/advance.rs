//! Cadence Advancer: moves a lead past the step that just ran.
//!
//! Runs on every outcome, success or failure, so one broken step cannot
//! freeze a lead. Automated cadences get the next schedule inserted here.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use outreach_core::error::Result;
use outreach_core::{
    AutomationMode, Cadence, CadenceLead, CadenceStep, LeadStatus, Schedule, ScheduleStatus,
};

use crate::persistence::CadenceDb;
use crate::timezone;

/// What advancing did to the lead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advancement {
    /// No step follows; the lead finished the cadence.
    Completed,
    /// Lead now points at `next_step_id`.
    Moved {
        next_step_id: String,
        /// Schedule inserted for the next step, if this call created one.
        scheduled_id: Option<String>,
        scheduled_at: Option<DateTime<Utc>>,
    },
}

pub struct CadenceAdvancer {
    db: Arc<CadenceDb>,
    same_day_grace: Duration,
}

impl CadenceAdvancer {
    pub fn new(db: Arc<CadenceDb>, same_day_grace_minutes: i64) -> Self {
        Self {
            db,
            same_day_grace: Duration::minutes(same_day_grace_minutes.max(0)),
        }
    }

    /// Advance the lead of `schedule` past `step`.
    pub fn advance(
        &self,
        cadence: &Cadence,
        schedule: &Schedule,
        step: &CadenceStep,
        now: DateTime<Utc>,
    ) -> Result<Advancement> {
        let lead_id = &schedule.lead_id;
        let Some(next) = self.db.next_step_after(&cadence.id, step.position())? else {
            self.set_lead(&cadence.id, lead_id, None, LeadStatus::Completed)?;
            tracing::info!(cadence_id = %cadence.id, lead_id = %lead_id, "🏁 Lead completed cadence");
            return Ok(Advancement::Completed);
        };

        self.db.ensure_instance_pending(&next.id, lead_id)?;

        if cadence.automation_mode == AutomationMode::Manual {
            self.set_lead(&cadence.id, lead_id, Some(&next.id), LeadStatus::Active)?;
            return Ok(Advancement::Moved {
                next_step_id: next.id,
                scheduled_id: None,
                scheduled_at: None,
            });
        }

        let mut scheduled_id = None;
        let mut scheduled_at = None;
        if self.db.has_open_schedule(&next.id, lead_id)? {
            tracing::debug!(lead_id = %lead_id, step_id = %next.id, "Next step already scheduled");
        } else {
            let zone = timezone::zone_or_utc(&cadence.timezone);
            let day_offset = next.day_offset - step.day_offset;
            let at = timezone::fire_time(
                now,
                zone,
                next.config.scheduled_time,
                day_offset,
                self.same_day_grace,
            );
            let owner_id = if schedule.owner_id.is_empty() {
                cadence.owner_id.clone()
            } else {
                schedule.owner_id.clone()
            };
            let new_schedule = Schedule {
                id: uuid::Uuid::new_v4().to_string(),
                cadence_id: cadence.id.clone(),
                cadence_step_id: next.id.clone(),
                lead_id: lead_id.clone(),
                owner_id,
                scheduled_at: at,
                timezone: cadence.timezone.clone(),
                status: ScheduleStatus::Scheduled,
                last_error: None,
                message_template_text: next.config.message().and_then(|m| m.template.clone()),
                message_rendered_text: None,
            };
            self.db.replace_open_schedule(&new_schedule)?;
            tracing::info!(
                lead_id = %lead_id,
                step_id = %next.id,
                scheduled_at = %at,
                "📅 Scheduled next step"
            );
            scheduled_id = Some(new_schedule.id);
            scheduled_at = Some(at);
        }

        self.set_lead(&cadence.id, lead_id, Some(&next.id), LeadStatus::Scheduled)?;
        Ok(Advancement::Moved {
            next_step_id: next.id,
            scheduled_id,
            scheduled_at,
        })
    }

    fn set_lead(
        &self,
        cadence_id: &str,
        lead_id: &str,
        current_step_id: Option<&str>,
        status: LeadStatus,
    ) -> Result<()> {
        self.db.upsert_cadence_lead(&CadenceLead {
            cadence_id: cadence_id.to_string(),
            lead_id: lead_id.to_string(),
            current_step_id: current_step_id.map(String::from),
            status,
        })
    }
}
