//! Resource model for the theme park provider.
//!
//! - **Resources**: [`Ride`] (a bookable attraction) and [`Operator`] (an
//!   assignable worker), joined in the closed [`Managed`] union
//! - **Conditions**: typed status flags produced by the lifecycle state
//!   machine in [`condition`]
//! - **Manifests**: YAML desired-state declarations

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod condition;
pub mod error;
pub mod manifest;
pub mod resource;

pub use condition::{
    Condition, ConditionReason, ConditionSet, ConditionStatus, ConditionType, LifecycleEvent,
    available, connecting, creating, deleting, operating, short_staffed,
};
pub use error::{Error, Result};
pub use manifest::{load_manifests, parse_json_manifests, parse_manifests};
pub use resource::{
    ConnectionDetails, GroupVersionKind, Managed, ManagedResource, ManagedStatus, ObjectKey,
    ObjectMeta, Operator, OperatorSpec, OperatorStatus, Ride, RideReference, RideSpec, RideStatus,
    ResourceKind, TypedReference,
};
