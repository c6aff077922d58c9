//! Managed reconciler: one observe, decide, act, persist pass.

use std::sync::Arc;
use std::time::Duration;

use themepark_core::{ConnectionDetails, Managed, ManagedStatus, ObjectKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::external::{ManagedClient, cancellable};
use crate::registry::HandlerRegistry;
use crate::store::ResourceStore;

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Deadline for a single reconcile attempt.
    pub reconcile_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(30),
        }
    }
}

/// Branch taken by a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The external counterpart did not exist and was created.
    Created,
    /// The external counterpart was brought up to date.
    Updated,
    /// Nothing to do.
    UpToDate,
    /// The Delete phase ran and the resource was released.
    Deleted,
    /// The resource no longer exists in the store.
    Gone,
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::UpToDate => "up-to-date",
            Self::Deleted => "deleted",
            Self::Gone => "gone",
        };
        f.write_str(s)
    }
}

/// Result of a successful reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub key: ObjectKey,
    pub outcome: ReconcileOutcome,
    /// Connection material published during the pass.
    pub connection_details: ConnectionDetails,
    /// Observed state at the end of the pass; `None` when gone.
    pub status: Option<ManagedStatus>,
    /// Whether the status was written back to the store.
    pub persisted: bool,
}

impl ReconcileReport {
    fn gone(key: ObjectKey) -> Self {
        Self {
            key,
            outcome: ReconcileOutcome::Gone,
            connection_details: ConnectionDetails::new(),
            status: None,
            persisted: false,
        }
    }
}

/// Drives resources through their external lifecycle.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    registry: HandlerRegistry,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        registry: HandlerRegistry,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Reconcile the resource identified by `key` once.
    ///
    /// The attempt is bounded by the configured timeout and by `cancel`;
    /// either firing aborts in-flight calls and yields
    /// [`Error::Cancelled`]. The client is disconnected whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the store or the connector.
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let attempt = cancel.child_token();
        let pass = tokio::time::timeout(
            self.config.reconcile_timeout,
            self.reconcile_pass(key, &attempt),
        )
        .await;

        match pass {
            Ok(result) => result,
            Err(_) => {
                attempt.cancel();
                warn!(
                    %key,
                    timeout_ms = self.config.reconcile_timeout.as_millis(),
                    "Reconcile deadline exceeded"
                );
                Err(Error::Cancelled)
            }
        }
    }

    async fn reconcile_pass(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let Some(resource) = cancellable(cancel, self.store.get(key)).await? else {
            debug!(%key, "Resource is gone");
            return Ok(ReconcileReport::gone(key.clone()));
        };

        let handler = self.registry.handler(key.kind)?;
        let (client, connected) = handler.connect(cancel, &resource).await?;

        let result = self
            .drive(client.as_ref(), &resource, connected, cancel)
            .await;

        if let Err(e) = client.disconnect().await {
            warn!(%key, error = %e, "Disconnect failed");
        }

        match &result {
            Ok(report) => info!(
                %key,
                outcome = %report.outcome,
                persisted = report.persisted,
                "Reconciled"
            ),
            Err(e) => warn!(%key, error = %e, retryable = e.is_retryable(), "Reconcile failed"),
        }
        result
    }

    async fn drive(
        &self,
        client: &dyn ManagedClient,
        resource: &Managed,
        connected: ManagedStatus,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let key = resource.key();
        let current = with_status(resource, connected)?;

        let observation = client.observe(cancel, &current).await?;
        let current = with_status(&current, observation.status)?;
        let mut connection_details = observation.connection_details;

        if resource.metadata().is_deleting() {
            let current = if observation.resource_exists {
                let deletion = client.delete(cancel, &current).await?;
                with_status(&current, deletion.status)?
            } else {
                current
            };
            let (status, persisted) = self.persist(resource, &current, cancel).await?;
            cancellable(cancel, self.store.remove(&key)).await?;
            return Ok(ReconcileReport {
                key,
                outcome: ReconcileOutcome::Deleted,
                connection_details,
                status: Some(status),
                persisted,
            });
        }

        let (outcome, current) = if !observation.resource_exists {
            let creation = client.create(cancel, &current).await?;
            connection_details.extend(creation.connection_details);
            (
                ReconcileOutcome::Created,
                with_status(&current, creation.status)?,
            )
        } else if !observation.resource_up_to_date {
            let update = client.update(cancel, &current).await?;
            (
                ReconcileOutcome::Updated,
                with_status(&current, update.status)?,
            )
        } else {
            (ReconcileOutcome::UpToDate, current)
        };

        let (status, persisted) = self.persist(resource, &current, cancel).await?;
        Ok(ReconcileReport {
            key,
            outcome,
            connection_details,
            status: Some(status),
            persisted,
        })
    }

    /// Write the observed state back if it changed, guarded by the
    /// version the pass started from.
    ///
    /// Conditions are settled against the stored snapshot first, so a
    /// condition that only passed through Connecting within this pass
    /// keeps its stored transition time.
    async fn persist(
        &self,
        original: &Managed,
        current: &Managed,
        cancel: &CancellationToken,
    ) -> Result<(ManagedStatus, bool)> {
        let stored = original.status();
        let status = current.status();
        let conditions = status.conditions().settled_against(stored.conditions());
        let status = status.with_conditions(conditions);
        if status == stored {
            return Ok((status, false));
        }
        let version = original.metadata().resource_version;
        cancellable(
            cancel,
            self.store
                .update_status(&original.key(), status.clone(), version),
        )
        .await?;
        Ok((status, true))
    }

    /// Keys of every resource of a registered kind, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListFailed`] if any collection cannot be listed.
    pub async fn keys(&self) -> Result<Vec<ObjectKey>> {
        let mut keys = Vec::new();
        for kind in self.registry.kinds() {
            let resources = self.store.list(kind).await?;
            keys.extend(resources.iter().map(Managed::key));
        }
        Ok(keys)
    }

    /// Get the store.
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

fn with_status(resource: &Managed, status: ManagedStatus) -> Result<Managed> {
    let actual = status.kind();
    resource
        .with_status(status)
        .ok_or_else(|| Error::wrong_kind(resource.kind(), actual))
}

/// Builder for Reconciler.
#[derive(Default)]
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn ResourceStore>>,
    registry: Option<HandlerRegistry>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set a custom handler registry.
    #[must_use]
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-attempt deadline.
    #[must_use]
    pub const fn reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.config.reconcile_timeout = timeout;
        self
    }

    /// Build the reconciler.
    ///
    /// Without an explicit registry, the Ride and Operator connectors are
    /// registered against the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no store was set or the
    /// timeout is zero.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("store is required"))?;
        if self.config.reconcile_timeout.is_zero() {
            return Err(Error::invalid_config("reconcile timeout must be positive"));
        }
        let registry = self
            .registry
            .unwrap_or_else(|| HandlerRegistry::theme_park(Arc::clone(&store)));
        Ok(Reconciler::new(store, registry, self.config))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreachable)]
mod tests {
    use themepark_core::{
        ConditionReason, ConditionStatus, ConditionType, Operator, ResourceKind, Ride,
    };

    use super::*;
    use crate::external::TypedHandler;
    use crate::operator::OperatorConnector;
    use crate::store::InMemoryStore;

    fn setup() -> (Reconciler, Arc<InMemoryStore>) {
        let store = InMemoryStore::new_arc();
        let reconciler = ReconcilerBuilder::new()
            .with_store(store.clone())
            .build()
            .unwrap();
        (reconciler, store)
    }

    fn ride_key(name: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::Ride, name)
    }

    async fn stored_ride(store: &InMemoryStore, name: &str) -> Ride {
        match store.get(&ride_key(name)).await.unwrap() {
            Some(Managed::Ride(ride)) => ride,
            other => unreachable!("expected ride, got {other:?}"),
        }
    }

    /// Given a ride and an operator assigned to it
    /// When the ride is reconciled
    /// Then its status is persisted with throughput and operator reference
    #[tokio::test]
    async fn ride_reconcile_persists_join() {
        let (reconciler, store) = setup();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        store
            .apply(Operator::new("op1", 20, Some("coaster")).into())
            .await
            .unwrap();

        let report = reconciler
            .reconcile(&ride_key("coaster"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, ReconcileOutcome::Updated);
        assert!(report.persisted);
        assert!(report.connection_details.contains_key("endpoint"));

        let ride = stored_ride(&store, "coaster").await;
        assert_eq!(ride.status.riders_per_hour, 80);
        assert_eq!(
            ride.status.operator_ref.map(|r| r.name),
            Some("op1".to_string())
        );
        assert!(ride.status.conditions.has(
            ConditionType::Ready,
            ConditionStatus::True,
            ConditionReason::Available
        ));
        assert!(ride.status.conditions.has(
            ConditionType::Operational,
            ConditionStatus::True,
            ConditionReason::Operating
        ));
    }

    /// Given a staffed ride reconciled several times
    /// When the stored Ready condition is read
    /// Then it is Available with the time of the first pass
    #[tokio::test]
    async fn reconciled_ride_is_ready() {
        let (reconciler, store) = setup();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        store
            .apply(Operator::new("op1", 20, Some("coaster")).into())
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        reconciler
            .reconcile(&ride_key("coaster"), &cancel)
            .await
            .unwrap();
        let first = stored_ride(&store, "coaster").await;
        for _ in 0..2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            reconciler
                .reconcile(&ride_key("coaster"), &cancel)
                .await
                .unwrap();
        }
        let ride = stored_ride(&store, "coaster").await;

        assert!(ride.status.conditions.has(
            ConditionType::Ready,
            ConditionStatus::True,
            ConditionReason::Available
        ));
        assert_eq!(
            ride.status.conditions.get(ConditionType::Ready),
            first.status.conditions.get(ConditionType::Ready)
        );
        assert_eq!(ride.metadata.resource_version, first.metadata.resource_version);
    }

    /// Given a ride already reconciled
    /// When it is reconciled again with no operator change
    /// Then nothing is written
    #[tokio::test]
    async fn second_pass_does_not_write() {
        let (reconciler, store) = setup();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let first = reconciler
            .reconcile(&ride_key("coaster"), &cancel)
            .await
            .unwrap();
        let second = reconciler
            .reconcile(&ride_key("coaster"), &cancel)
            .await
            .unwrap();

        assert!(first.persisted);
        assert!(!second.persisted);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn operator_reconcile_is_up_to_date() {
        let (reconciler, store) = setup();
        store
            .apply(Operator::new("op1", 20, None).into())
            .await
            .unwrap();

        let report = reconciler
            .reconcile(
                &ObjectKey::new(ResourceKind::Operator, "op1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, ReconcileOutcome::UpToDate);
        let status = report.status.unwrap();
        assert!(status.conditions().has(
            ConditionType::Ready,
            ConditionStatus::True,
            ConditionReason::Available
        ));
    }

    /// Given an operator already reconciled to Available
    /// When it is reconciled again with nothing changed
    /// Then nothing is written and the transition time is kept
    #[tokio::test]
    async fn unchanged_operator_is_not_rewritten() {
        let (reconciler, store) = setup();
        store
            .apply(Operator::new("op1", 20, None).into())
            .await
            .unwrap();
        let key = ObjectKey::new(ResourceKind::Operator, "op1");
        let cancel = CancellationToken::new();

        let first = reconciler.reconcile(&key, &cancel).await.unwrap();
        let version = store.get(&key).await.unwrap().unwrap().metadata().resource_version;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let second = reconciler.reconcile(&key, &cancel).await.unwrap();

        assert!(first.persisted);
        assert!(!second.persisted);
        assert_eq!(first.status, second.status);
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.metadata().resource_version, version);
    }

    #[tokio::test]
    async fn missing_resource_is_gone() {
        let (reconciler, _) = setup();
        let report = reconciler
            .reconcile(&ride_key("nope"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, ReconcileOutcome::Gone);
        assert!(report.status.is_none());
    }

    /// Given a ride marked for deletion
    /// When it is reconciled
    /// Then the Delete phase runs and the ride is released
    #[tokio::test]
    async fn deletion_releases_resource() {
        let (reconciler, store) = setup();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        store.request_deletion(&ride_key("coaster")).await.unwrap();

        let report = reconciler
            .reconcile(&ride_key("coaster"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, ReconcileOutcome::Deleted);
        assert!(report.status.unwrap().conditions().has(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Deleting
        ));
        assert!(store.get(&ride_key("coaster")).await.unwrap().is_none());
    }

    /// Given a registry missing the ride handler
    /// When a ride is reconciled
    /// Then it fails without touching the stored status
    #[tokio::test]
    async fn unregistered_kind_fails_without_mutation() {
        let store = InMemoryStore::new_arc();
        let registry = HandlerRegistry::new().register(TypedHandler::new(OperatorConnector::new()));
        let reconciler = ReconcilerBuilder::new()
            .with_store(store.clone())
            .with_registry(registry)
            .build()
            .unwrap();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();

        let result = reconciler
            .reconcile(&ride_key("coaster"), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::HandlerNotRegistered { .. })));
        let ride = stored_ride(&store, "coaster").await;
        assert!(ride.status.conditions.is_empty());
        assert_eq!(ride.metadata.resource_version, 1);
    }

    #[tokio::test]
    async fn list_failure_leaves_status_untouched() {
        let (reconciler, store) = setup();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        store.set_fail_lists(true);

        let err = reconciler
            .reconcile(&ride_key("coaster"), &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(err.is_retryable());
        let ride = stored_ride(&store, "coaster").await;
        assert!(ride.status.conditions.is_empty());
    }

    /// Given a store whose list call outlasts the deadline
    /// When a ride is reconciled
    /// Then the attempt is cancelled
    #[tokio::test]
    async fn deadline_yields_cancelled() {
        let store = InMemoryStore::new_arc();
        let reconciler = ReconcilerBuilder::new()
            .with_store(store.clone())
            .reconcile_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        store.set_list_latency(Duration::from_secs(60));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            reconciler.reconcile(&ride_key("coaster"), &CancellationToken::new()),
        )
        .await;

        assert_eq!(result.ok().and_then(|r| r.err()), Some(Error::Cancelled));
    }

    #[tokio::test]
    async fn keys_lists_registered_kinds() {
        let (reconciler, store) = setup();
        store
            .apply(Operator::new("op1", 20, None).into())
            .await
            .unwrap();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();

        let keys = reconciler.keys().await.unwrap();
        assert_eq!(
            keys,
            vec![
                ride_key("coaster"),
                ObjectKey::new(ResourceKind::Operator, "op1")
            ]
        );
    }

    #[test]
    fn builder_requires_store() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
