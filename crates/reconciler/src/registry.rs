//! Dispatch table from resource kind to connector.

use std::collections::HashMap;
use std::sync::Arc;

use themepark_core::ResourceKind;

use crate::error::{Error, Result};
use crate::external::{ManagedHandler, TypedHandler};
use crate::operator::OperatorConnector;
use crate::ride::RideConnector;
use crate::store::ResourceStore;

/// Maps each [`ResourceKind`] to the handler that reconciles it.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ResourceKind, Arc<dyn ManagedHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Ride and Operator connectors wired to `store`.
    #[must_use]
    pub fn theme_park(store: Arc<dyn ResourceStore>) -> Self {
        Self::new()
            .register(TypedHandler::new(RideConnector::new(store)))
            .register(TypedHandler::new(OperatorConnector::new()))
    }

    /// Register a handler under the kind it reports, replacing any
    /// previous handler for that kind.
    #[must_use]
    pub fn register(mut self, handler: impl ManagedHandler + 'static) -> Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    /// Look up the handler for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotRegistered`] if nothing handles `kind`.
    pub fn handler(&self, kind: ResourceKind) -> Result<Arc<dyn ManagedHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or(Error::HandlerNotRegistered { kind })
    }

    /// Registered kinds, in declaration order.
    #[must_use]
    pub fn kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_theme_park_registers_both_kinds() {
        let registry = HandlerRegistry::theme_park(InMemoryStore::new_arc());
        assert_eq!(
            registry.kinds(),
            vec![ResourceKind::Ride, ResourceKind::Operator]
        );
        assert!(registry.handler(ResourceKind::Ride).is_ok());
    }

    #[test]
    fn test_missing_handler() {
        let registry = HandlerRegistry::new().register(TypedHandler::new(OperatorConnector::new()));
        assert_eq!(
            registry.handler(ResourceKind::Ride).err(),
            Some(Error::HandlerNotRegistered {
                kind: ResourceKind::Ride
            })
        );
    }
}
