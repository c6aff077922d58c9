//! Resource store trait and implementations.
//!
//! The store is the only shared mutable state in the system. Status
//! writes use optimistic concurrency: a write carrying a stale
//! `resource_version` fails with [`Error::Conflict`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use themepark_core::{Managed, ManagedStatus, ObjectKey, Operator, ResourceKind};
use tokio::sync::{RwLock, broadcast};

use crate::error::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notification published by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Desired state was created or replaced.
    Applied(ObjectKey),
    /// Observed state was written.
    StatusUpdated(ObjectKey),
    /// Deletion was requested; the resource awaits its Delete phase.
    DeletionRequested(ObjectKey),
    /// The resource was released.
    Removed(ObjectKey),
}

impl StoreEvent {
    /// Key of the resource the event is about.
    #[must_use]
    pub const fn key(&self) -> &ObjectKey {
        match self {
            Self::Applied(k)
            | Self::StatusUpdated(k)
            | Self::DeletionRequested(k)
            | Self::Removed(k) => k,
        }
    }

    /// Whether the event changes what other resources may join against.
    #[must_use]
    pub const fn changes_desired_state(&self) -> bool {
        !matches!(self, Self::StatusUpdated(_))
    }
}

/// Trait for resource storage backends.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one resource.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Managed>>;

    /// List every resource of a kind, in name order.
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Managed>>;

    /// List every Operator, in name order.
    async fn list_operators(&self) -> Result<Vec<Operator>> {
        let resources = self.list(ResourceKind::Operator).await?;
        Ok(resources
            .into_iter()
            .filter_map(|r| match r {
                Managed::Operator(o) => Some(o),
                Managed::Ride(_) => None,
            })
            .collect())
    }

    /// Create or replace the desired state of a resource.
    ///
    /// Status and identity of an existing resource are preserved.
    async fn apply(&self, resource: Managed) -> Result<Managed>;

    /// Write observed state, guarded by `expected_version`.
    async fn update_status(
        &self,
        key: &ObjectKey,
        status: ManagedStatus,
        expected_version: u64,
    ) -> Result<Managed>;

    /// Mark a resource for deletion.
    async fn request_deletion(&self, key: &ObjectKey) -> Result<()>;

    /// Release a resource after its Delete phase.
    async fn remove(&self, key: &ObjectKey) -> Result<()>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-memory resource store.
pub struct InMemoryStore {
    resources: RwLock<BTreeMap<ObjectKey, Managed>>,
    events: broadcast::Sender<StoreEvent>,
    fail_lists: AtomicBool,
    list_latency_ms: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            resources: RwLock::new(BTreeMap::new()),
            events,
            fail_lists: AtomicBool::new(false),
            list_latency_ms: AtomicU64::new(0),
        }
    }
}

impl InMemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make subsequent list calls fail, for fault injection.
    pub fn set_fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Delay every list call, to model a slow backend.
    pub fn set_list_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.list_latency_ms.store(millis, Ordering::SeqCst);
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Managed>> {
        Ok(self.resources.read().await.get(key).cloned())
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<Managed>> {
        let latency = self.list_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(Error::list_failed(kind, "store unavailable"));
        }
        let resources = self.resources.read().await;
        Ok(resources
            .values()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect())
    }

    async fn apply(&self, resource: Managed) -> Result<Managed> {
        let key = resource.key();
        let mut resources = self.resources.write().await;

        let stored = match resources.get(&key) {
            Some(current) => {
                let changed = current.spec_differs(&resource);
                let mut next = current
                    .with_spec_of(&resource)
                    .ok_or_else(|| Error::wrong_kind(key.kind, resource.kind()))?;
                let meta = next.metadata_mut();
                meta.resource_version = meta.resource_version.saturating_add(1);
                if changed {
                    meta.generation = meta.generation.saturating_add(1);
                }
                next
            }
            None => {
                let mut next = resource;
                let meta = next.metadata_mut();
                meta.resource_version = 1;
                meta.generation = 1;
                meta.deletion_timestamp = None;
                next
            }
        };

        resources.insert(key.clone(), stored.clone());
        drop(resources);

        self.publish(StoreEvent::Applied(key));
        Ok(stored)
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: ManagedStatus,
        expected_version: u64,
    ) -> Result<Managed> {
        let mut resources = self.resources.write().await;
        let current = resources
            .get(key)
            .ok_or_else(|| Error::not_found(key.clone()))?;

        let actual = current.metadata().resource_version;
        if actual != expected_version {
            return Err(Error::Conflict {
                key: key.clone(),
                expected: expected_version,
                actual,
            });
        }

        let status_kind = status.kind();
        let mut next = current
            .with_status(status)
            .ok_or_else(|| Error::wrong_kind(key.kind, status_kind))?;
        let meta = next.metadata_mut();
        meta.resource_version = meta.resource_version.saturating_add(1);

        resources.insert(key.clone(), next.clone());
        drop(resources);

        self.publish(StoreEvent::StatusUpdated(key.clone()));
        Ok(next)
    }

    async fn request_deletion(&self, key: &ObjectKey) -> Result<()> {
        let mut resources = self.resources.write().await;
        let current = resources
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.clone()))?;

        let meta = current.metadata_mut();
        if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version = meta.resource_version.saturating_add(1);
        }
        drop(resources);

        self.publish(StoreEvent::DeletionRequested(key.clone()));
        Ok(())
    }

    async fn remove(&self, key: &ObjectKey) -> Result<()> {
        let removed = self.resources.write().await.remove(key);
        if removed.is_some() {
            self.publish(StoreEvent::Removed(key.clone()));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

/// A wrapper that adds tracing to a resource store.
pub struct TracingStore<S: ResourceStore + ?Sized> {
    inner: Arc<S>,
}

impl<S: ResourceStore + ?Sized> TracingStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: Arc<S>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for TracingStore<S> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Managed>> {
        tracing::trace!(%key, "Getting resource");
        self.inner.get(key).await
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<Managed>> {
        tracing::debug!(%kind, "Listing resources");
        let result = self.inner.list(kind).await;
        if let Err(ref e) = result {
            tracing::warn!(%kind, error = %e, "List failed");
        }
        result
    }

    async fn apply(&self, resource: Managed) -> Result<Managed> {
        tracing::debug!(key = %resource.key(), "Applying resource");
        self.inner.apply(resource).await
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: ManagedStatus,
        expected_version: u64,
    ) -> Result<Managed> {
        tracing::debug!(%key, expected_version, "Updating status");
        let result = self.inner.update_status(key, status, expected_version).await;
        if let Ok(ref stored) = result {
            tracing::trace!(
                %key,
                resource_version = stored.metadata().resource_version,
                "Status updated"
            );
        }
        result
    }

    async fn request_deletion(&self, key: &ObjectKey) -> Result<()> {
        tracing::debug!(%key, "Requesting deletion");
        self.inner.request_deletion(key).await
    }

    async fn remove(&self, key: &ObjectKey) -> Result<()> {
        tracing::debug!(%key, "Removing resource");
        self.inner.remove(key).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreachable)]
mod tests {
    use themepark_core::{Ride, RideStatus};

    use super::*;

    fn ride_key(name: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::Ride, name)
    }

    #[tokio::test]
    async fn test_apply_and_get() {
        let store = InMemoryStore::new();
        let stored = store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        assert_eq!(stored.metadata().resource_version, 1);

        let fetched = store.get(&ride_key("coaster")).await.unwrap();
        assert_eq!(fetched, Some(stored));
    }

    #[tokio::test]
    async fn test_apply_preserves_identity_and_status() {
        let store = InMemoryStore::new();
        let first = store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        let status = ManagedStatus::Ride(RideStatus {
            riders_per_hour: 80,
            ..RideStatus::default()
        });
        store
            .update_status(&ride_key("coaster"), status, 1)
            .await
            .unwrap();

        let second = store
            .apply(Ride::new("coaster", "roller-coaster", 6).into())
            .await
            .unwrap();

        let Managed::Ride(ride) = second else {
            unreachable!("applied a ride")
        };
        assert_eq!(ride.metadata.uid, first.metadata().uid);
        assert_eq!(ride.metadata.generation, 2);
        assert_eq!(ride.status.riders_per_hour, 80);
        assert_eq!(ride.spec.capacity, 6);
    }

    #[tokio::test]
    async fn test_stale_status_write_conflicts() {
        let store = InMemoryStore::new();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();

        let status = ManagedStatus::Ride(RideStatus::default());
        store
            .update_status(&ride_key("coaster"), status.clone(), 1)
            .await
            .unwrap();

        // Version 1 has been superseded by the first write.
        let result = store.update_status(&ride_key("coaster"), status, 1).await;
        assert!(matches!(
            result,
            Err(Error::Conflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_status_of_wrong_kind_rejected() {
        let store = InMemoryStore::new();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();

        let status = ManagedStatus::Operator(themepark_core::OperatorStatus::default());
        let result = store.update_status(&ride_key("coaster"), status, 1).await;
        assert!(matches!(result, Err(Error::WrongKind { .. })));
    }

    #[tokio::test]
    async fn test_list_operators_in_name_order() {
        let store = InMemoryStore::new();
        store
            .apply(Operator::new("zed", 1, None).into())
            .await
            .unwrap();
        store
            .apply(Operator::new("amy", 1, None).into())
            .await
            .unwrap();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();

        let operators = store.list_operators().await.unwrap();
        let names: Vec<_> = operators.iter().map(Operator::name).collect();
        assert_eq!(names, vec!["amy", "zed"]);
    }

    #[tokio::test]
    async fn test_fail_lists() {
        let store = InMemoryStore::new();
        store.set_fail_lists(true);
        let result = store.list_operators().await;
        assert!(matches!(result, Err(Error::ListFailed { .. })));
    }

    #[tokio::test]
    async fn test_tracing_store_delegates() {
        let inner = InMemoryStore::new_arc();
        let traced = TracingStore::new(Arc::clone(&inner));
        traced
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();

        assert!(inner.get(&ride_key("coaster")).await.unwrap().is_some());
        assert_eq!(traced.list(ResourceKind::Ride).await.unwrap().len(), 1);

        inner.set_fail_lists(true);
        assert!(traced.list_operators().await.is_err());
    }

    #[tokio::test]
    async fn test_deletion_and_removal_publish_events() {
        let store = InMemoryStore::new();
        let mut events = store.subscribe();
        store
            .apply(Ride::new("coaster", "roller-coaster", 4).into())
            .await
            .unwrap();
        store.request_deletion(&ride_key("coaster")).await.unwrap();
        store.remove(&ride_key("coaster")).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Applied(ride_key("coaster"))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::DeletionRequested(ride_key("coaster"))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Removed(ride_key("coaster"))
        );
        assert!(store.get(&ride_key("coaster")).await.unwrap().is_none());
    }
}
