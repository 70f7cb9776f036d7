//! # Outreach Core
//!
//! Shared vocabulary for the cadence engine: the persisted data model,
//! typed step configuration, collaborator traits, configuration and errors.

pub mod config;
pub mod context;
pub mod error;
pub mod step_config;
pub mod traits;
pub mod types;

pub use config::OutreachConfig;
pub use context::AuthContext;
pub use error::{OutreachError, Result};
pub use step_config::{MessageConfig, ReactionType, StepAction, StepConfig};
pub use types::{
    AutomationMode, Cadence, CadenceLead, CadenceStatus, CadenceStep, LeadStatus,
    LeadStepInstance, InstanceStatus, Schedule, ScheduleStatus, StepType,
};
