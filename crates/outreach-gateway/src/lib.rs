//! # Outreach Gateway
//!
//! Axum HTTP surface: the process-queue trigger (for cron or manual calls)
//! plus enrollment, automation start, lead cancellation and the activity log.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
