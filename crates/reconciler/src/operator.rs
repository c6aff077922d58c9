//! External connector for Operators.

use async_trait::async_trait;
use themepark_core::{
    Condition, Operator, OperatorStatus, ResourceKind, available, connecting, creating, deleting,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::external::{
    Connection, ExternalClient, ExternalConnector, ExternalCreation, ExternalDelete,
    ExternalObservation, ExternalUpdate, created_connection_details, observed_connection_details,
};

/// Connects Operator clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct OperatorConnector;

impl OperatorConnector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExternalConnector for OperatorConnector {
    type Resource = Operator;

    async fn connect(
        &self,
        cancel: &CancellationToken,
        operator: &Operator,
    ) -> Result<Connection<Operator>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        info!(operator = operator.name(), "Connecting to provider");
        Ok(Connection {
            client: Box::new(OperatorClient),
            status: transition(operator, connecting()),
        })
    }
}

/// Operator client. Operators have no external dependencies, so the
/// client holds no state.
#[derive(Debug, Default, Clone, Copy)]
pub struct OperatorClient;

fn transition(operator: &Operator, condition: Condition) -> OperatorStatus {
    OperatorStatus {
        conditions: operator.status.conditions.with(condition),
    }
}

#[async_trait]
impl ExternalClient for OperatorClient {
    type Resource = Operator;

    async fn observe(
        &self,
        _cancel: &CancellationToken,
        operator: &Operator,
    ) -> Result<ExternalObservation<OperatorStatus>> {
        debug!(operator = operator.name(), "Observing");
        Ok(ExternalObservation {
            resource_exists: true,
            resource_up_to_date: true,
            connection_details: observed_connection_details(),
            status: transition(operator, available()),
        })
    }

    async fn create(
        &self,
        _cancel: &CancellationToken,
        operator: &Operator,
    ) -> Result<ExternalCreation<OperatorStatus>> {
        info!(operator = operator.name(), "Create");
        Ok(ExternalCreation {
            connection_details: created_connection_details(ResourceKind::Operator),
            status: transition(operator, creating()),
        })
    }

    async fn update(
        &self,
        _cancel: &CancellationToken,
        operator: &Operator,
    ) -> Result<ExternalUpdate<OperatorStatus>> {
        debug!(operator = operator.name(), "Update");
        Ok(ExternalUpdate {
            status: operator.status.clone(),
        })
    }

    async fn delete(
        &self,
        _cancel: &CancellationToken,
        operator: &Operator,
    ) -> Result<ExternalDelete<OperatorStatus>> {
        info!(operator = operator.name(), "Delete");
        Ok(ExternalDelete {
            status: transition(operator, deleting()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use themepark_core::{ConditionReason, ConditionStatus, ConditionType};

    use super::*;

    #[tokio::test]
    async fn test_observe_reports_available() {
        let op = Operator::new("op1", 20, Some("coaster"));
        let observation = OperatorClient
            .observe(&CancellationToken::new(), &op)
            .await
            .unwrap();

        assert!(observation.resource_exists);
        assert!(observation.resource_up_to_date);
        assert_eq!(
            observation.connection_details.get("user"),
            Some(&b"user".to_vec())
        );
        assert!(observation.status.conditions.has(
            ConditionType::Ready,
            ConditionStatus::True,
            ConditionReason::Available
        ));
    }

    #[tokio::test]
    async fn test_create_emits_placeholder_details() {
        let op = Operator::new("op1", 20, None);
        let creation = OperatorClient
            .create(&CancellationToken::new(), &op)
            .await
            .unwrap();

        assert_eq!(
            creation.connection_details.get("operator"),
            Some(&b"maybe".to_vec())
        );
        assert!(creation.status.conditions.has(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Creating
        ));
    }

    #[tokio::test]
    async fn test_update_is_noop() {
        let op = Operator::new("op1", 20, None);
        let available = OperatorClient
            .observe(&CancellationToken::new(), &op)
            .await
            .unwrap();
        let op = op.with_status(available.status.clone());

        let update = OperatorClient
            .update(&CancellationToken::new(), &op)
            .await
            .unwrap();
        assert_eq!(update.status, available.status);
    }

    #[tokio::test]
    async fn test_delete_sets_deleting() {
        let op = Operator::new("op1", 20, None);
        let deletion = OperatorClient
            .delete(&CancellationToken::new(), &op)
            .await
            .unwrap();
        assert!(deletion.status.conditions.has(
            ConditionType::Ready,
            ConditionStatus::False,
            ConditionReason::Deleting
        ));
    }

    #[tokio::test]
    async fn test_connect_respects_cancellation() {
        let op = Operator::new("op1", 20, None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = OperatorConnector::new().connect(&cancel, &op).await;
        assert_eq!(result.err(), Some(Error::Cancelled));
    }
}
