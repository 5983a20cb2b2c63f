//! # Outbound Sync
//!
//! Change-data-capture and reconciliation from a relational store to
//! external HTTP systems.
//!
//! ## Architecture
//!
//! Every (entity, destination) pair has a sync state recording the remote id,
//! the digest of the last pushed payload and when it was last confirmed.
//! An entity is stale when it, or any dependency declared for the
//! destination, changed after that confirmation.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              outbound-sync                                │
//! │                                                                           │
//! │  ┌─────────────────┐   ┌──────────────┐   ┌──────────────────────────┐    │
//! │  │ StalenessFinder │──►│ BatchDriver  │──►│ Synchronizer             │    │
//! │  │ (one SQL query  │   │ (keyset      │   │ (row lock, digest gate,  │    │
//! │  │  per pair)      │   │  pages)      │   │  adapter upsert)         │    │
//! │  └─────────────────┘   └──────┬───────┘   └────────────┬─────────────┘    │
//! │                               │ enqueue                │                  │
//! │                               ▼                        ▼                  │
//! │                        ┌──────────────┐        ┌───────────────┐          │
//! │                        │ EnqueueGuard │        │ SyncStateStore│          │
//! │                        │ (dedup lock) │        │ (sync_states) │          │
//! │                        └──────────────┘        └───────────────┘          │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Paths
//!
//! 1. **Change hooks**: [`SyncService::after_commit`] schedules a sync for each
//!    binding right after the application writes.
//! 2. **Sweep**: [`sweep::run_sweep`] periodically finds everything the hooks
//!    missed, including changes that only touched dependencies.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use outbound_sync::registry::{Association, DestinationBinding, EntityType, FnSerializer, Registry, Table};
//! use outbound_sync::{register_http_destinations, SyncConfig, SyncService};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> outbound_sync::Result<()> {
//!     let config = SyncConfig::from_toml_str(
//!         r#"
//!         [store]
//!         sqlite_path = "app.db"
//!
//!         [destinations.crm]
//!         base_url = "https://api.example-crm.com"
//!         "#,
//!     )?;
//!
//!     let mut registry = Registry::new();
//!     register_http_destinations(&mut registry, &config)?;
//!     registry.declare_entity(
//!         EntityType::new("Company", "companies")
//!             .association("contacts", Association::has_many(Table::new("contacts"), "company_id"))
//!             .sync_to(
//!                 "crm",
//!                 DestinationBinding::new("companies", FnSerializer::new(|r| Ok(r.attributes.clone())))
//!                     .identity("domain")
//!                     .depends_on(["contacts"]),
//!             ),
//!     )?;
//!
//!     let (service, worker) = SyncService::connect(&config, Arc::new(registry)).await?;
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     tokio::spawn(worker.run(shutdown_rx));
//!
//!     let stats = service.batch_driver().run(&Default::default()).await?;
//!     println!("synced {} stale entities", stats.total);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod deleter;
pub mod destination;
pub mod digest;
pub mod error;
pub mod finder;
pub mod jobs;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod resilience;
pub mod service;
pub mod sql;
pub mod state;
pub mod sweep;
pub mod synchronizer;

// Re-exports for convenience
pub use batch::{BatchDriver, BatchMode, BatchOptions, BatchStats};
pub use config::{BatchSettings, JobSettings, StoreConfig, SweepConfig, SyncConfig};
pub use deleter::{DeleteOutcome, Deleter};
pub use destination::{Destination, DestinationError, HttpDestination, NoOpDestination};
pub use digest::{DigestStrategy, StableDigest};
pub use error::{Result, SyncError};
pub use finder::{StaleQueries, StaleQuery, StalenessFinder};
pub use jobs::{EnqueueGuard, JobOutcome, JobWorker, ScheduleOutcome, SyncJob};
pub use record::Record;
pub use registry::{DestinationBinding, EntityType, Registry};
pub use service::{register_http_destinations, HookOutcome, SyncService};
pub use state::{SyncState, SyncStateStore};
pub use synchronizer::{SyncOutcome, Synchronizer};
