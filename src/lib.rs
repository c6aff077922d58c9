#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Theme park provider
//!
//! Wires the resource store, the Ride and Operator connectors, and the
//! reconciliation loop into one process.

pub mod cli;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use themepark_core::{Managed, ManagedStatus, ResourceKind};
use themepark_reconciler::{
    InMemoryStore, LoopStatsSnapshot, ProviderConfig, ReconcileOutcome, Reconciler,
    ReconcilerBuilder, ReconciliationLoop, ResourceStore, Result, TracingStore,
};
use tracing::{info, warn};

// Re-export workspace crates
pub use themepark_core;
pub use themepark_reconciler;

/// Observed state of one resource after a check pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ManagedStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A provider process: store, reconciler, and configuration.
pub struct Provider {
    store: Arc<InMemoryStore>,
    reconciler: Arc<Reconciler>,
    config: ProviderConfig,
}

impl Provider {
    /// Build a provider with an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let store = InMemoryStore::new_arc();
        let reconciler = ReconcilerBuilder::new()
            .with_store(Arc::new(TracingStore::new(Arc::clone(&store))))
            .with_config(config.reconciler_config())
            .build()?;
        Ok(Self {
            store,
            reconciler: Arc::new(reconciler),
            config,
        })
    }

    /// Apply declared resources to the store.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn seed(&self, resources: Vec<Managed>) -> Result<usize> {
        let count = resources.len();
        for resource in resources {
            self.store.apply(resource).await?;
        }
        info!(count, "Seeded resources");
        Ok(count)
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> Arc<InMemoryStore> {
        Arc::clone(&self.store)
    }

    /// The provider configuration.
    #[must_use]
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// A loop over this provider's reconciler.
    #[must_use]
    pub fn reconciliation_loop(&self) -> ReconciliationLoop {
        ReconciliationLoop::new(Arc::clone(&self.reconciler), self.config.loop_config())
    }

    /// Reconcile every resource once and report the resulting statuses.
    ///
    /// # Errors
    ///
    /// Returns an error if the resources cannot be listed.
    pub async fn check(&self) -> Result<Vec<StatusEntry>> {
        let results = self.reconciliation_loop().reconcile_once().await?;
        Ok(results
            .into_iter()
            .filter(|(_, result)| {
                !matches!(result, Ok(report) if report.outcome == ReconcileOutcome::Gone)
            })
            .map(|(key, result)| match result {
                Ok(report) => StatusEntry {
                    kind: key.kind,
                    name: key.name,
                    outcome: Some(report.outcome.to_string()),
                    status: report.status,
                    error: None,
                },
                Err(e) => StatusEntry {
                    kind: key.kind,
                    name: key.name,
                    outcome: None,
                    status: None,
                    error: Some(e.to_string()),
                },
            })
            .collect())
    }

    /// Run the loop until `shutdown` completes, then stop it gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop fails or its task is lost.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<LoopStatsSnapshot> {
        if self.config.leader_election {
            // Single process: always the leader.
            info!("Leader election enabled; acquired leadership");
        }
        if self.config.tls.use_tls {
            info!(endpoint = %self.config.provider_endpoint, "Transport security enabled");
        }

        let mut loop_runner = self.reconciliation_loop();
        let stopper = loop_runner.stopper();
        let stats = loop_runner.stats();
        let handle = tokio::spawn(async move { loop_runner.run().await });

        shutdown.await;
        info!("Stopping reconciliation loop");
        stopper.stop();

        match handle.await {
            Ok(result) => result?,
            Err(e) => {
                warn!(error = %e, "Reconciliation loop task failed");
                return Err(themepark_reconciler::Error::LoopStopped);
            }
        }
        Ok(stats.snapshot())
    }
}
