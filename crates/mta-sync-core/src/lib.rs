//! # mta-sync-core
//!
//! Periodic reconciliation of MTA (Migration Toolkit for Applications)
//! applications into a software catalog.
//!
//! Each run fetches the complete application inventory from the MTA hub,
//! maps every record to a catalog `Component` entity and submits the whole
//! set as one full mutation. The catalog diffs that set against what this
//! provider submitted before, so additions, updates and removals all follow
//! from a single message.
//!
//! A run that cannot trust its input submits nothing:
//!
//! - remote errors, timeouts and cancellation defer the run;
//! - a non-empty inventory in which no record maps defers the run instead of
//!   wiping the provider's entities;
//! - a run started while another is in flight is rejected.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mta_sync_core::{EngineOptions, EntityMapper, ReconciliationEngine};
//!
//! let engine = ReconciliationEngine::new(
//!     Arc::new(client),
//!     Arc::new(catalog),
//!     EntityMapper::new(mapper_options),
//!     EngineOptions::default(),
//! );
//! let result = engine.run().await;
//! ```

pub mod engine;
pub mod entity;
mod error;
pub mod mapper;
pub mod schedule;
pub mod settings;
pub mod state;
mod traits;
pub mod types;

pub use engine::{
    DeferReason, EngineOptions, ReconciliationEngine, RunReport, RunResult, provider_name_for,
};
pub use entity::{CanonicalEntity, EntityMutation, EntityRef, ProvidedEntity};
pub use error::{ConfigError, ErrorCategory, LeaseError, MappingError, SourceError, SubmissionError};
pub use mapper::{EntityMapper, MappedBatch, MapperOptions, entity_name_for};
pub use schedule::{PeriodicRunner, RetryPolicy, ScheduleSettings};
pub use settings::{SyncSettings, parse_iso_duration};
pub use state::{EnginePhase, ProviderRunState, RunOutcomeKind};
pub use traits::{
    ApplicationSource, DistributedLease, EntityProviderConnection, LeaseToken, ScheduledTask,
};
pub use types::RemoteApplicationRecord;
