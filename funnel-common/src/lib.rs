//! # Funnel Common Library
//!
//! Shared code for the acquisition funnel service:
//! - Hosted backend access (row models, store trait, REST and in-memory stores)
//! - Event ingestion and ad pixels
//! - Funnel aggregation
//! - Dashboard CRUD with a read-through query cache
//! - Email CRM client
//! - Event bus, SSE helpers and configuration loading

pub mod analytics;
pub mod config;
pub mod crm;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;
pub mod tracking;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use time::TimeRange;
