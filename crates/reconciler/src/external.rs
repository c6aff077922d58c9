//! External connector and client contracts.
//!
//! Connectors are written against a concrete resource type through
//! [`ExternalConnector`] and [`ExternalClient`]. The reconciler works on
//! the closed [`Managed`] union instead, through [`ManagedHandler`] and
//! [`ManagedClient`]; [`TypedHandler`] bridges the two and is the single
//! place where a kind mismatch can surface as [`Error::WrongKind`].
//!
//! Every operation takes an immutable snapshot of the resource and
//! returns the new observed state. Persisting it is the caller's job.

use std::future::Future;

use async_trait::async_trait;
use themepark_core::{ConnectionDetails, Managed, ManagedResource, ManagedStatus, ResourceKind};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Observed-state type of a resource.
pub type StatusOf<R> = <R as ManagedResource>::Status;

/// Result of observing the external counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalObservation<S> {
    /// Whether the external counterpart exists.
    pub resource_exists: bool,
    /// Whether it matches the desired state.
    pub resource_up_to_date: bool,
    /// Connection material for the host to publish.
    pub connection_details: ConnectionDetails,
    /// Observed state after observing.
    pub status: S,
}

impl<S> ExternalObservation<S> {
    fn map_status<T>(self, f: impl FnOnce(S) -> T) -> ExternalObservation<T> {
        ExternalObservation {
            resource_exists: self.resource_exists,
            resource_up_to_date: self.resource_up_to_date,
            connection_details: self.connection_details,
            status: f(self.status),
        }
    }
}

/// Result of creating the external counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCreation<S> {
    pub connection_details: ConnectionDetails,
    pub status: S,
}

/// Result of updating the external counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalUpdate<S> {
    pub status: S,
}

/// Result of deleting the external counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDelete<S> {
    pub status: S,
}

/// A connected client plus the observed state produced by connecting.
pub struct Connection<R: ManagedResource> {
    pub client: Box<dyn ExternalClient<Resource = R>>,
    pub status: StatusOf<R>,
}

/// Produces a client scoped to one reconcile attempt.
#[async_trait]
pub trait ExternalConnector: Send + Sync {
    /// Resource type this connector handles.
    type Resource: ManagedResource;

    /// Connect a fresh client for `resource`.
    async fn connect(
        &self,
        cancel: &CancellationToken,
        resource: &Self::Resource,
    ) -> Result<Connection<Self::Resource>>;
}

/// Four-phase lifecycle against the external counterpart of one kind.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    /// Resource type this client handles.
    type Resource: ManagedResource;

    /// Report whether the external counterpart exists and is up to date.
    async fn observe(
        &self,
        cancel: &CancellationToken,
        resource: &Self::Resource,
    ) -> Result<ExternalObservation<StatusOf<Self::Resource>>>;

    /// Create the external counterpart.
    async fn create(
        &self,
        cancel: &CancellationToken,
        resource: &Self::Resource,
    ) -> Result<ExternalCreation<StatusOf<Self::Resource>>>;

    /// Bring the external counterpart in line with the desired state.
    async fn update(
        &self,
        cancel: &CancellationToken,
        resource: &Self::Resource,
    ) -> Result<ExternalUpdate<StatusOf<Self::Resource>>>;

    /// Tear down the external counterpart.
    async fn delete(
        &self,
        cancel: &CancellationToken,
        resource: &Self::Resource,
    ) -> Result<ExternalDelete<StatusOf<Self::Resource>>>;

    /// Release the client.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Kind-erased connector, as stored in the dispatch table.
#[async_trait]
pub trait ManagedHandler: Send + Sync {
    /// Kind this handler accepts.
    fn kind(&self) -> ResourceKind;

    /// Connect a client for `resource`.
    async fn connect(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<(Box<dyn ManagedClient>, ManagedStatus)>;
}

/// Kind-erased client.
#[async_trait]
pub trait ManagedClient: Send + Sync {
    async fn observe(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<ExternalObservation<ManagedStatus>>;

    async fn create(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<ExternalCreation<ManagedStatus>>;

    async fn update(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<ExternalUpdate<ManagedStatus>>;

    async fn delete(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<ExternalDelete<ManagedStatus>>;

    async fn disconnect(&self) -> Result<()>;
}

/// Borrow the typed resource out of the union.
///
/// # Errors
///
/// Returns [`Error::WrongKind`] if `managed` is not an `R`.
pub fn downcast<R: ManagedResource>(managed: &Managed) -> Result<&R> {
    R::from_managed(managed).ok_or_else(|| Error::wrong_kind(R::KIND, managed.kind()))
}

/// Run `fut` unless `cancel` fires first.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] on cancellation, otherwise the error of
/// `fut`.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Adapts a typed connector to the kind-erased dispatch table.
pub struct TypedHandler<C> {
    connector: C,
}

impl<C: ExternalConnector> TypedHandler<C> {
    /// Wrap a typed connector.
    pub const fn new(connector: C) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl<C> ManagedHandler for TypedHandler<C>
where
    C: ExternalConnector + 'static,
{
    fn kind(&self) -> ResourceKind {
        C::Resource::KIND
    }

    async fn connect(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<(Box<dyn ManagedClient>, ManagedStatus)> {
        let typed = downcast::<C::Resource>(resource)?;
        let connection = self.connector.connect(cancel, typed).await?;
        let client: Box<dyn ManagedClient> = Box::new(TypedClient {
            inner: connection.client,
        });
        Ok((client, C::Resource::wrap_status(connection.status)))
    }
}

struct TypedClient<R: ManagedResource> {
    inner: Box<dyn ExternalClient<Resource = R>>,
}

#[async_trait]
impl<R: ManagedResource> ManagedClient for TypedClient<R> {
    async fn observe(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<ExternalObservation<ManagedStatus>> {
        let typed = downcast::<R>(resource)?;
        let observation = self.inner.observe(cancel, typed).await?;
        Ok(observation.map_status(R::wrap_status))
    }

    async fn create(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<ExternalCreation<ManagedStatus>> {
        let typed = downcast::<R>(resource)?;
        let creation = self.inner.create(cancel, typed).await?;
        Ok(ExternalCreation {
            connection_details: creation.connection_details,
            status: R::wrap_status(creation.status),
        })
    }

    async fn update(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<ExternalUpdate<ManagedStatus>> {
        let typed = downcast::<R>(resource)?;
        let update = self.inner.update(cancel, typed).await?;
        Ok(ExternalUpdate {
            status: R::wrap_status(update.status),
        })
    }

    async fn delete(
        &self,
        cancel: &CancellationToken,
        resource: &Managed,
    ) -> Result<ExternalDelete<ManagedStatus>> {
        let typed = downcast::<R>(resource)?;
        let deletion = self.inner.delete(cancel, typed).await?;
        Ok(ExternalDelete {
            status: R::wrap_status(deletion.status),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }
}

/// Placeholder connection details emitted on Observe.
#[must_use]
pub fn observed_connection_details() -> ConnectionDetails {
    ConnectionDetails::from([
        ("user".to_string(), b"user".to_vec()),
        ("endpoint".to_string(), b"host".to_vec()),
    ])
}

/// Placeholder connection details emitted on Create.
#[must_use]
pub fn created_connection_details(kind: ResourceKind) -> ConnectionDetails {
    ConnectionDetails::from([(kind.lowercase().to_string(), b"maybe".to_vec())])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use themepark_core::{Operator, Ride};

    use super::*;

    #[test]
    fn test_downcast() {
        let managed = Managed::from(Ride::new("coaster", "roller-coaster", 4));
        assert!(downcast::<Ride>(&managed).is_ok());
        assert_eq!(
            downcast::<Operator>(&managed).err(),
            Some(Error::wrong_kind(ResourceKind::Operator, ResourceKind::Ride))
        );
    }

    #[test]
    fn test_placeholder_details() {
        let observed = observed_connection_details();
        assert_eq!(observed.get("user"), Some(&b"user".to_vec()));
        assert_eq!(observed.get("endpoint"), Some(&b"host".to_vec()));

        let created = created_connection_details(ResourceKind::Operator);
        assert_eq!(created.len(), 1);
        assert!(created.contains_key("operator"));
    }

    #[tokio::test]
    async fn test_cancellable_passes_through() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, async { Ok::<_, Error>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_cancellable_aborts_promptly() {
        let cancel = CancellationToken::new();
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, Error>(())
        };
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(1), cancellable(&cancel, slow)).await;
        assert_eq!(result.ok(), Some(Err(Error::Cancelled)));
    }
}
