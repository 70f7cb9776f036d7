//! # Outreach Channels
//!
//! HTTP implementations of the engine's external collaborators:
//! - `HttpChannelAdapter`: one endpoint per step type on the channel service
//! - `HttpContentProvider`: message generation
//! - `HttpPostLookup`: a lead's most recent post, for like/comment steps

pub mod adapter;
pub mod client;
pub mod content;
pub mod posts;

pub use adapter::HttpChannelAdapter;
pub use client::JsonClient;
pub use content::HttpContentProvider;
pub use posts::HttpPostLookup;
