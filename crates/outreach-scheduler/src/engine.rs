//! Batch Runner: processes one bounded batch of due schedules.
//!
//! Items run strictly one after another with a random pause in between, so
//! external channels never see a burst. Each invocation is stateless; the
//! claim in the store is what keeps overlapping runs from double-sending.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use outreach_core::config::QueueConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{ActivityEntry, ActivityLogger, AdapterResponse};
use outreach_core::{
    AuthContext, Cadence, CadenceStep, InstanceStatus, Schedule, ScheduleStatus,
};

use crate::advance::CadenceAdvancer;
use crate::content::ContentResolver;
use crate::dispatch::ActionDispatcher;
use crate::persistence::CadenceDb;

/// Options accepted by the process-queue entry point.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessQueueRequest {
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

/// Outcome of one schedule in the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub schedule_id: String,
    pub lead_id: String,
    pub step_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the schedule was intentionally not executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl ItemResult {
    fn new(schedule: &Schedule, step_type: &str) -> Self {
        Self {
            schedule_id: schedule.id.clone(),
            lead_id: schedule.lead_id.clone(),
            step_type: step_type.to_string(),
            success: false,
            error: None,
            skipped: None,
        }
    }

    fn succeeded(mut self) -> Self {
        self.success = true;
        self
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skipped = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessQueueResponse {
    pub success: bool,
    pub dry_run: bool,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<ItemResult>,
}

impl ProcessQueueResponse {
    fn from_results(dry_run: bool, results: Vec<ItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let skipped = results.iter().filter(|r| r.skipped.is_some()).count();
        let failed = results
            .iter()
            .filter(|r| !r.success && r.skipped.is_none())
            .count();
        Self {
            success: true,
            dry_run,
            processed: results.len(),
            succeeded,
            failed,
            skipped,
            results,
        }
    }
}

/// Effective batch options after defaults and bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BatchOptions {
    limit: usize,
    min_delay_ms: u64,
    max_delay_ms: u64,
    dry_run: bool,
}

impl BatchOptions {
    fn resolve(req: &ProcessQueueRequest, cfg: &QueueConfig) -> Self {
        let limit = req.limit.unwrap_or(cfg.limit).clamp(1, cfg.max_limit.max(1));
        let min = req.min_delay_ms.unwrap_or(cfg.min_delay_ms);
        let max = req.max_delay_ms.unwrap_or(cfg.max_delay_ms);
        Self {
            limit,
            min_delay_ms: min.min(max),
            max_delay_ms: min.max(max),
            dry_run: req.dry_run,
        }
    }

    fn pause(&self) -> Duration {
        if self.max_delay_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(self.min_delay_ms..=self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

pub struct BatchRunner {
    db: Arc<CadenceDb>,
    resolver: ContentResolver,
    dispatcher: ActionDispatcher,
    advancer: CadenceAdvancer,
    activity: Arc<dyn ActivityLogger>,
    queue: QueueConfig,
}

impl BatchRunner {
    pub fn new(
        db: Arc<CadenceDb>,
        resolver: ContentResolver,
        dispatcher: ActionDispatcher,
        activity: Arc<dyn ActivityLogger>,
        queue: QueueConfig,
    ) -> Self {
        let advancer = CadenceAdvancer::new(db.clone(), queue.same_day_grace_minutes);
        Self {
            db,
            resolver,
            dispatcher,
            advancer,
            activity,
            queue,
        }
    }

    pub async fn run(&self, ctx: &AuthContext, req: &ProcessQueueRequest) -> Result<ProcessQueueResponse> {
        self.run_at(ctx, req, Utc::now()).await
    }

    /// Process due schedules as of `now`.
    ///
    /// Only a failure to read the due list is returned as `Err`; per-item
    /// problems are recorded on the schedule and reported in the results.
    pub async fn run_at(
        &self,
        ctx: &AuthContext,
        req: &ProcessQueueRequest,
        now: DateTime<Utc>,
    ) -> Result<ProcessQueueResponse> {
        let opts = BatchOptions::resolve(req, &self.queue);
        let due = self.db.select_due(now, opts.limit)?;
        tracing::info!(
            due = due.len(),
            limit = opts.limit,
            dry_run = opts.dry_run,
            "📬 Processing schedule batch"
        );

        if opts.dry_run {
            let results = due.iter().map(|s| self.preview(s)).collect();
            return Ok(ProcessQueueResponse::from_results(true, results));
        }

        let started = Instant::now();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut results = Vec::with_capacity(due.len());
        let total = due.len();

        for (i, schedule) in due.iter().enumerate() {
            let item_now = now + chrono::Duration::from_std(started.elapsed()).unwrap_or_default();
            let first_for_pair =
                seen.insert((schedule.lead_id.clone(), schedule.cadence_step_id.clone()));

            let outcome = if first_for_pair {
                self.process_one(ctx, schedule, item_now).await
            } else {
                self.skip_in_batch_duplicate(schedule)
            };

            match outcome {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(schedule_id = %schedule.id, error = %e, "Schedule processing error");
                    // A claimed row must not stay in processing.
                    if let Err(cleanup) =
                        self.db.finish(&schedule.id, ScheduleStatus::Failed, Some(&e.to_string()))
                    {
                        tracing::warn!(
                            schedule_id = %schedule.id,
                            error = %cleanup,
                            "Could not mark schedule failed"
                        );
                    }
                    results.push(ItemResult::new(schedule, "unknown").failed(e.to_string()));
                }
            }

            if i + 1 < total {
                let pause = opts.pause();
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
        }

        let response = ProcessQueueResponse::from_results(false, results);
        tracing::info!(
            processed = response.processed,
            succeeded = response.succeeded,
            failed = response.failed,
            skipped = response.skipped,
            "✅ Batch finished"
        );
        Ok(response)
    }

    fn preview(&self, schedule: &Schedule) -> ItemResult {
        match self.db.get_step(&schedule.cadence_step_id) {
            Ok(Some(step)) => ItemResult::new(schedule, step.step_type.as_str()).succeeded(),
            Ok(None) => ItemResult::new(schedule, "unknown").failed("cadence step not found"),
            Err(e) => ItemResult::new(schedule, "unknown").failed(e.to_string()),
        }
    }

    fn skip_in_batch_duplicate(&self, schedule: &Schedule) -> Result<Option<ItemResult>> {
        if !self.db.claim(&schedule.id)? {
            return Ok(None);
        }
        let reason = "duplicate schedule in batch";
        self.db
            .finish(&schedule.id, ScheduleStatus::SkippedDueToStateChange, Some(reason))?;
        tracing::info!(schedule_id = %schedule.id, lead_id = %schedule.lead_id, "Skipped in-batch duplicate");
        let step_type = self
            .db
            .get_step(&schedule.cadence_step_id)?
            .map(|s| s.step_type.to_string())
            .unwrap_or_else(|| "unknown".into());
        Ok(Some(ItemResult::new(schedule, &step_type).skipped(reason)))
    }

    /// Claim and execute one schedule. `Ok(None)` means another worker owns it.
    async fn process_one(
        &self,
        ctx: &AuthContext,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<ItemResult>> {
        if !self.db.claim(&schedule.id)? {
            tracing::debug!(schedule_id = %schedule.id, "Claim lost, skipping");
            return Ok(None);
        }

        let Some(step) = self.db.get_step(&schedule.cadence_step_id)? else {
            let reason = format!("cadence step {} not found", schedule.cadence_step_id);
            tracing::warn!(schedule_id = %schedule.id, "{reason}");
            self.db.finish(&schedule.id, ScheduleStatus::Failed, Some(&reason))?;
            return Ok(Some(ItemResult::new(schedule, "unknown").failed(reason)));
        };
        let result = ItemResult::new(schedule, step.step_type.as_str());

        let cadence = match self.db.get_cadence(&schedule.cadence_id) {
            Ok(c) => c,
            Err(OutreachError::NotFound(what)) => {
                let reason = format!("{what} not found");
                self.db.finish(&schedule.id, ScheduleStatus::Failed, Some(&reason))?;
                return Ok(Some(result.failed(reason)));
            }
            Err(e) => return Err(e),
        };

        if let Some(lead) = self.db.get_cadence_lead(&cadence.id, &schedule.lead_id)? {
            if lead.status.is_terminal() {
                let reason = format!("lead is {}", lead.status.as_str());
                self.skip(schedule, &reason)?;
                return Ok(Some(result.skipped(reason)));
            }
        }

        if !step.step_type.is_supported() {
            let reason = format!("unsupported step type: {}", step.step_type);
            self.skip(schedule, &reason)?;
            self.log(ctx, schedule, &step, "skipped", json!({"reason": reason})).await;
            self.advance(&cadence, schedule, &step, now);
            return Ok(Some(result.skipped(reason)));
        }

        if let Some(reason) = self.already_done(schedule)? {
            self.skip(schedule, reason)?;
            return Ok(Some(result.skipped(reason)));
        }

        let owner_ctx = ctx.for_owner(&schedule.owner_id);
        let (response, rendered) = match self.resolver.resolve(&owner_ctx, schedule, &step).await {
            Ok(content) => {
                let resp = self.dispatcher.dispatch(&owner_ctx, schedule, &step, &content).await;
                (resp, content.body)
            }
            Err(e) => (
                AdapterResponse {
                    success: false,
                    error: Some(e.to_string()),
                    data: None,
                },
                None,
            ),
        };

        let result = if response.success {
            self.db.finish(&schedule.id, ScheduleStatus::Executed, None)?;
            self.db.record_instance(
                &step.id,
                &schedule.lead_id,
                InstanceStatus::Sent,
                rendered.as_deref(),
                None,
                response.data.as_ref(),
            )?;
            tracing::info!(
                schedule_id = %schedule.id,
                lead_id = %schedule.lead_id,
                step_type = %step.step_type,
                "📤 Step executed"
            );
            result.succeeded()
        } else {
            let error = response.error.clone().unwrap_or_else(|| "dispatch failed".into());
            self.db.finish(&schedule.id, ScheduleStatus::Failed, Some(&error))?;
            self.db.record_instance(
                &step.id,
                &schedule.lead_id,
                InstanceStatus::Failed,
                rendered.as_deref(),
                Some(&error),
                response.data.as_ref(),
            )?;
            tracing::warn!(
                schedule_id = %schedule.id,
                lead_id = %schedule.lead_id,
                step_type = %step.step_type,
                error = %error,
                "Step failed"
            );
            result.failed(error)
        };

        let status = if result.success { "executed" } else { "failed" };
        self.log(
            &owner_ctx,
            schedule,
            &step,
            status,
            json!({"schedule_id": schedule.id, "error": result.error, "data": response.data}),
        )
        .await;
        self.advance(&cadence, schedule, &step, now);
        Ok(Some(result))
    }

    /// Persistent dedup: the pair already ran under some schedule.
    fn already_done(&self, schedule: &Schedule) -> Result<Option<&'static str>> {
        let sent = self
            .db
            .get_instance(&schedule.cadence_step_id, &schedule.lead_id)?
            .is_some_and(|i| i.status == InstanceStatus::Sent);
        if sent {
            return Ok(Some("step already sent to lead"));
        }
        if self
            .db
            .has_executed_schedule(&schedule.cadence_step_id, &schedule.lead_id, &schedule.id)?
        {
            return Ok(Some("step already executed by another schedule"));
        }
        Ok(None)
    }

    fn skip(&self, schedule: &Schedule, reason: &str) -> Result<()> {
        self.db
            .finish(&schedule.id, ScheduleStatus::SkippedDueToStateChange, Some(reason))?;
        tracing::info!(schedule_id = %schedule.id, reason, "Schedule skipped");
        Ok(())
    }

    fn advance(&self, cadence: &Cadence, schedule: &Schedule, step: &CadenceStep, now: DateTime<Utc>) {
        if let Err(e) = self.advancer.advance(cadence, schedule, step, now) {
            tracing::error!(
                schedule_id = %schedule.id,
                lead_id = %schedule.lead_id,
                error = %e,
                "Could not advance lead"
            );
        }
    }

    async fn log(
        &self,
        ctx: &AuthContext,
        schedule: &Schedule,
        step: &CadenceStep,
        status: &str,
        details: serde_json::Value,
    ) {
        let entry = ActivityEntry {
            owner_id: ctx.owner_id.clone().unwrap_or_else(|| schedule.owner_id.clone()),
            cadence_id: schedule.cadence_id.clone(),
            step_id: Some(step.id.clone()),
            lead_id: schedule.lead_id.clone(),
            action: step.step_type.to_string(),
            status: status.to_string(),
            details,
        };
        if let Err(e) = self.activity.log(entry).await {
            tracing::warn!(schedule_id = %schedule.id, error = %e, "Activity log write failed");
        }
    }
}
