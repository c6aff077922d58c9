//! Reconciliation engine for Ride and Operator resources.
//!
//! Each resource is driven through a four-phase external lifecycle
//! (observe, then create, update or delete) by a [`Reconciler`], one
//! pass at a time, with the resulting observed state written back to a
//! [`ResourceStore`]. A Ride's observed state is a join against the
//! Operator collection: the Operator referencing it by name supplies
//! the throughput (`capacity × frequency`) and the operator reference.
//!
//! # Key Concepts
//!
//! ## Connectors
//!
//! Connectors are written per kind against [`ExternalConnector`] and
//! [`ExternalClient`], then erased to the closed [`Managed`] union by
//! [`TypedHandler`] and registered in a [`HandlerRegistry`].
//!
//! ## Loop
//!
//! [`ReconciliationLoop`] schedules passes: on a poll interval, on store
//! change notifications, and with backoff after failures.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use themepark_reconciler::{
//!     InMemoryStore, LoopConfig, ReconcilerBuilder, ReconciliationLoop,
//! };
//!
//! #[tokio::main]
//! async fn main() -> themepark_reconciler::Result<()> {
//!     let store = InMemoryStore::new_arc();
//!     let reconciler = Arc::new(ReconcilerBuilder::new().with_store(store).build()?);
//!     let mut loop_runner = ReconciliationLoop::new(reconciler, LoopConfig::default());
//!     loop_runner.run().await
//! }
//! ```
//!
//! [`Managed`]: themepark_core::Managed

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod external;
pub mod r#loop;
pub mod operator;
pub mod reconciler;
pub mod registry;
pub mod resolver;
pub mod ride;
pub mod store;

// Re-export main types
pub use config::{ProviderConfig, TlsConfig};
pub use error::{Error, Result};
pub use external::{
    Connection, ExternalClient, ExternalConnector, ExternalCreation, ExternalDelete,
    ExternalObservation, ExternalUpdate, ManagedClient, ManagedHandler, TypedHandler, cancellable,
    downcast,
};
pub use r#loop::{LoopConfig, LoopStats, LoopStatsSnapshot, LoopStopper, ReconciliationLoop};
pub use operator::{OperatorClient, OperatorConnector};
pub use reconciler::{
    ReconcileOutcome, ReconcileReport, Reconciler, ReconcilerBuilder, ReconcilerConfig,
};
pub use registry::HandlerRegistry;
pub use resolver::{assigned_operators, resolve_operator, riders_per_hour};
pub use ride::{RideClient, RideConnector};
pub use store::{InMemoryStore, ResourceStore, StoreEvent, TracingStore};
