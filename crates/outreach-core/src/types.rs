//! Data model: cadences, steps, enrolled leads, step instances and schedules.
//!
//! Status enums are persisted as snake_case strings; `as_str`/`parse` are the
//! only conversion points so the SQL layer never spells a status by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::step_config::StepConfig;

/// Channel action a cadence step performs.
///
/// Unknown names read from storage land in `Unsupported` instead of failing the
/// whole row, so configuration drift surfaces as a skipped schedule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum StepType {
    LinkedinMessage,
    LinkedinConnect,
    LinkedinLike,
    LinkedinComment,
    SendEmail,
    Unsupported(String),
}

impl StepType {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "linkedin_message" => StepType::LinkedinMessage,
            "linkedin_connect" => StepType::LinkedinConnect,
            "linkedin_like" => StepType::LinkedinLike,
            "linkedin_comment" => StepType::LinkedinComment,
            "send_email" => StepType::SendEmail,
            other => StepType::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepType::LinkedinMessage => "linkedin_message",
            StepType::LinkedinConnect => "linkedin_connect",
            StepType::LinkedinLike => "linkedin_like",
            StepType::LinkedinComment => "linkedin_comment",
            StepType::SendEmail => "send_email",
            StepType::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, StepType::Unsupported(_))
    }

    /// Steps that act on a post and need a target post URL.
    pub fn needs_post(&self) -> bool {
        matches!(self, StepType::LinkedinLike | StepType::LinkedinComment)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for StepType {
    fn from(s: String) -> Self {
        StepType::parse(&s)
    }
}

impl From<StepType> for String {
    fn from(t: StepType) -> Self {
        t.as_str().to_string()
    }
}

/// Whether the advancer schedules follow-up steps itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    Manual,
    Automated,
}

impl AutomationMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "automated" => AutomationMode::Automated,
            _ => AutomationMode::Manual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationMode::Manual => "manual",
            AutomationMode::Automated => "automated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl CadenceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CadenceStatus::Draft),
            "active" => Some(CadenceStatus::Active),
            "paused" => Some(CadenceStatus::Paused),
            "completed" => Some(CadenceStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CadenceStatus::Draft => "draft",
            CadenceStatus::Active => "active",
            CadenceStatus::Paused => "paused",
            CadenceStatus::Completed => "completed",
        }
    }
}

/// Lifecycle of a lead inside one cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Scheduled,
    Active,
    Completed,
    Replied,
    Removed,
}

impl LeadStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(LeadStatus::Scheduled),
            "active" => Some(LeadStatus::Active),
            "completed" => Some(LeadStatus::Completed),
            "replied" => Some(LeadStatus::Replied),
            "removed" => Some(LeadStatus::Removed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Scheduled => "scheduled",
            LeadStatus::Active => "active",
            LeadStatus::Completed => "completed",
            LeadStatus::Replied => "replied",
            LeadStatus::Removed => "removed",
        }
    }

    /// Terminal leads are never advanced or scheduled again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeadStatus::Completed | LeadStatus::Replied | LeadStatus::Removed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Generated,
    Sent,
    Failed,
}

impl InstanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InstanceStatus::Pending),
            "generated" => Some(InstanceStatus::Generated),
            "sent" => Some(InstanceStatus::Sent),
            "failed" => Some(InstanceStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Generated => "generated",
            InstanceStatus::Sent => "sent",
            InstanceStatus::Failed => "failed",
        }
    }
}

/// Schedule status. `Scheduled` → `Processing` is the claim; everything after
/// `Processing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Processing,
    Executed,
    Failed,
    SkippedDueToStateChange,
    Canceled,
}

impl ScheduleStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(ScheduleStatus::Scheduled),
            "processing" => Some(ScheduleStatus::Processing),
            "executed" => Some(ScheduleStatus::Executed),
            "failed" => Some(ScheduleStatus::Failed),
            "skipped_due_to_state_change" => Some(ScheduleStatus::SkippedDueToStateChange),
            "canceled" => Some(ScheduleStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Processing => "processing",
            ScheduleStatus::Executed => "executed",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::SkippedDueToStateChange => "skipped_due_to_state_change",
            ScheduleStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScheduleStatus::Scheduled | ScheduleStatus::Processing)
    }
}

/// A named outreach sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cadence {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub automation_mode: AutomationMode,
    /// IANA zone name, e.g. "America/New_York".
    pub timezone: String,
    pub status: CadenceStatus,
}

/// One step definition inside a cadence.
#[derive(Debug, Clone, Serialize)]
pub struct CadenceStep {
    pub id: String,
    pub cadence_id: String,
    pub step_type: StepType,
    pub step_label: String,
    pub day_offset: i64,
    pub order_in_day: i64,
    pub config: StepConfig,
}

impl CadenceStep {
    /// Execution order key within the cadence.
    pub fn position(&self) -> (i64, i64) {
        (self.day_offset, self.order_in_day)
    }
}

/// A lead enrolled in a cadence. Exactly one per (cadence, lead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceLead {
    pub cadence_id: String,
    pub lead_id: String,
    pub current_step_id: Option<String>,
    pub status: LeadStatus,
}

/// Execution record for one (step, lead) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadStepInstance {
    pub cadence_step_id: String,
    pub lead_id: String,
    pub status: InstanceStatus,
    pub message_rendered_text: Option<String>,
    pub last_error: Option<String>,
    pub result_snapshot: Option<serde_json::Value>,
}

/// A concrete, time-stamped intent to run one step for one lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub cadence_id: String,
    pub cadence_step_id: String,
    pub lead_id: String,
    pub owner_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub status: ScheduleStatus,
    pub last_error: Option<String>,
    pub message_template_text: Option<String>,
    pub message_rendered_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_roundtrip_and_unknown() {
        for name in [
            "linkedin_message",
            "linkedin_connect",
            "linkedin_like",
            "linkedin_comment",
            "send_email",
        ] {
            let t = StepType::parse(name);
            assert!(t.is_supported());
            assert_eq!(t.as_str(), name);
        }
        let t = StepType::parse("linkedin_visit_profile");
        assert_eq!(t, StepType::Unsupported("linkedin_visit_profile".into()));
        assert!(!t.is_supported());
        assert_eq!(t.to_string(), "linkedin_visit_profile");
    }

    #[test]
    fn test_schedule_status_terminality() {
        assert!(!ScheduleStatus::Scheduled.is_terminal());
        assert!(!ScheduleStatus::Processing.is_terminal());
        assert!(ScheduleStatus::Executed.is_terminal());
        assert!(ScheduleStatus::Canceled.is_terminal());
        assert_eq!(
            ScheduleStatus::parse("skipped_due_to_state_change"),
            Some(ScheduleStatus::SkippedDueToStateChange)
        );
        assert_eq!(ScheduleStatus::parse("bogus"), None);
    }

    #[test]
    fn test_lead_status_terminal() {
        assert!(LeadStatus::Completed.is_terminal());
        assert!(LeadStatus::Replied.is_terminal());
        assert!(!LeadStatus::Scheduled.is_terminal());
        assert!(!LeadStatus::Active.is_terminal());
    }
}
