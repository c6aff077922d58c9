//! External connector for Rides.
//!
//! A Ride's observed state is a join against the Operator collection,
//! which can change at any time without notifying the Ride. Observe
//! therefore always reports the Ride as out of date, forcing every pass
//! through [`ExternalClient::update`], which recomputes the join.

use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use themepark_core::{
    Operator, Ride, RideStatus, available, connecting, creating, deleting, operating,
    short_staffed,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::external::{
    Connection, ExternalClient, ExternalConnector, ExternalCreation, ExternalDelete,
    ExternalObservation, ExternalUpdate, cancellable, created_connection_details,
    observed_connection_details,
};
use crate::resolver::{assigned_operators, resolve_operator, riders_per_hour};
use crate::store::ResourceStore;

/// Connects Ride clients bound to a store handle.
pub struct RideConnector {
    store: Arc<dyn ResourceStore>,
}

impl RideConnector {
    /// Create a new ride connector.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExternalConnector for RideConnector {
    type Resource = Ride;

    async fn connect(&self, cancel: &CancellationToken, ride: &Ride) -> Result<Connection<Ride>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        info!(ride = ride.name(), "Connecting to provider");

        let status = RideStatus {
            conditions: ride.status.conditions.with(connecting()),
            ..ride.status.clone()
        };
        Ok(Connection {
            client: Box::new(RideClient {
                store: Arc::clone(&self.store),
            }),
            status,
        })
    }
}

/// Ride client scoped to one reconcile attempt.
pub struct RideClient {
    store: Arc<dyn ResourceStore>,
}

impl RideClient {
    /// Observed state for `ride` given the operator it resolved to.
    ///
    /// A successful join makes the Ride Ready either way; staffing is
    /// reported on the Operational condition.
    fn staffed_status(ride: &Ride, operator: Option<&Operator>) -> RideStatus {
        let ready = ride.status.conditions.with(available());
        match operator {
            Some(op) => RideStatus {
                conditions: ready.with(operating()),
                operator_ref: Some(op.typed_reference()),
                riders_per_hour: riders_per_hour(ride, Some(op)),
            },
            None => RideStatus {
                conditions: ready.with(short_staffed()),
                operator_ref: None,
                riders_per_hour: 0,
            },
        }
    }
}

#[async_trait]
impl ExternalClient for RideClient {
    type Resource = Ride;

    async fn observe(
        &self,
        _cancel: &CancellationToken,
        ride: &Ride,
    ) -> Result<ExternalObservation<RideStatus>> {
        debug!(ride = ride.name(), "Observing");
        Ok(ExternalObservation {
            resource_exists: true,
            resource_up_to_date: false,
            connection_details: observed_connection_details(),
            status: ride.status.clone(),
        })
    }

    async fn create(
        &self,
        _cancel: &CancellationToken,
        ride: &Ride,
    ) -> Result<ExternalCreation<RideStatus>> {
        info!(ride = ride.name(), "Create");
        Ok(ExternalCreation {
            connection_details: created_connection_details(themepark_core::ResourceKind::Ride),
            status: RideStatus {
                conditions: ride.status.conditions.with(creating()),
                ..ride.status.clone()
            },
        })
    }

    async fn update(
        &self,
        cancel: &CancellationToken,
        ride: &Ride,
    ) -> Result<ExternalUpdate<RideStatus>> {
        debug!(ride = ride.name(), "Update");

        let operators = cancellable(cancel, self.store.list_operators()).await?;

        let assigned = assigned_operators(ride.name(), &operators);
        if assigned.len() > 1 {
            warn!(
                ride = ride.name(),
                operators = %assigned.iter().map(|o| o.name()).join(", "),
                "Multiple operators reference this ride; the last one listed is used"
            );
        }

        let operator = resolve_operator(ride.name(), &operators);
        let status = Self::staffed_status(ride, operator);

        match operator {
            Some(op) => debug!(
                ride = ride.name(),
                operator = op.name(),
                riders_per_hour = status.riders_per_hour,
                "Ride is operating"
            ),
            None => debug!(ride = ride.name(), "Ride is short staffed"),
        }

        Ok(ExternalUpdate { status })
    }

    async fn delete(
        &self,
        _cancel: &CancellationToken,
        ride: &Ride,
    ) -> Result<ExternalDelete<RideStatus>> {
        info!(ride = ride.name(), "Delete");
        Ok(ExternalDelete {
            status: RideStatus {
                conditions: ride.status.conditions.with(deleting()),
                ..ride.status.clone()
            },
        })
    }
}
