//! Ride and Operator resources and the closed union over them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::condition::ConditionSet;

/// API group shared by every theme park kind.
pub const GROUP: &str = "themepark.n3wscott.com";

/// API version shared by every theme park kind.
pub const VERSION: &str = "v1alpha1";

/// Group/version/kind triple used for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
}

impl GroupVersionKind {
    /// `group/version` as written in `apiVersion`.
    #[must_use]
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// Closed set of kinds this provider reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Ride,
    Operator,
}

impl ResourceKind {
    /// All kinds, in registration order.
    pub const ALL: [Self; 2] = [Self::Ride, Self::Operator];

    /// Group/version/kind identifier for this kind.
    #[must_use]
    pub const fn gvk(self) -> GroupVersionKind {
        let kind = match self {
            Self::Ride => "Ride",
            Self::Operator => "Operator",
        };
        GroupVersionKind {
            group: GROUP,
            version: VERSION,
            kind,
        }
    }

    /// Lower-case kind name, used as the placeholder connection key.
    #[must_use]
    pub const fn lowercase(self) -> &'static str {
        match self {
            Self::Ride => "ride",
            Self::Operator => "operator",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.gvk().kind)
    }
}

/// Identity of one resource in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl ObjectKey {
    /// Create a new object key.
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind.lowercase(), self.name)
    }
}

/// Metadata common to every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "Ulid::new")]
    pub uid: Ulid,
    /// Optimistic-concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata for a new resource.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Ulid::new(),
            resource_version: 0,
            generation: 0,
            deletion_timestamp: None,
        }
    }

    /// Check if deletion of the resource was requested.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Reference to a resource of a specific kind, with its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Ulid,
}

/// Name-only reference from an Operator to the Ride it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideReference {
    pub name: String,
}

/// Named byte blobs handed to the host on Observe and Create.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Desired state of a Ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideSpec {
    /// Type of ride.
    #[serde(rename = "type")]
    pub ride_type: String,
    /// Riders per trip supported on this ride.
    pub capacity: u32,
}

/// Observed state of a Ride.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideStatus {
    #[serde(default)]
    pub conditions: ConditionSet,
    /// The operator assigned to this ride, set by reconciliation only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_ref: Option<TypedReference>,
    #[serde(default)]
    pub riders_per_hour: u64,
}

/// A bookable attraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ride {
    pub metadata: ObjectMeta,
    pub spec: RideSpec,
    #[serde(default)]
    pub status: RideStatus,
}

impl Ride {
    /// Create a ride with empty status.
    pub fn new(name: impl Into<String>, ride_type: impl Into<String>, capacity: u32) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec: RideSpec {
                ride_type: ride_type.into(),
                capacity,
            },
            status: RideStatus::default(),
        }
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Copy of this ride carrying `status`.
    #[must_use]
    pub fn with_status(&self, status: RideStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Desired state of an Operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpec {
    /// How often this operator runs its ride, per hour.
    pub frequency: u32,
    /// The ride this operator is assigned to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_ref: Option<RideReference>,
}

/// Observed state of an Operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorStatus {
    #[serde(default)]
    pub conditions: ConditionSet,
}

/// An assignable worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub metadata: ObjectMeta,
    pub spec: OperatorSpec,
    #[serde(default)]
    pub status: OperatorStatus,
}

impl Operator {
    /// Create an operator with empty status.
    pub fn new(name: impl Into<String>, frequency: u32, ride: Option<&str>) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec: OperatorSpec {
                frequency,
                ride_ref: ride.map(|name| RideReference {
                    name: name.to_string(),
                }),
            },
            status: OperatorStatus::default(),
        }
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Check whether this operator is assigned to the named ride.
    #[must_use]
    pub fn serves(&self, ride_name: &str) -> bool {
        self.spec
            .ride_ref
            .as_ref()
            .is_some_and(|r| r.name == ride_name)
    }

    /// Typed reference to this operator, as recorded on a Ride.
    #[must_use]
    pub fn typed_reference(&self) -> TypedReference {
        let gvk = ResourceKind::Operator.gvk();
        TypedReference {
            api_version: gvk.api_version(),
            kind: gvk.kind.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid,
        }
    }

    /// Copy of this operator carrying `status`.
    #[must_use]
    pub fn with_status(&self, status: OperatorStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Any resource this provider manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Managed {
    Ride(Ride),
    Operator(Operator),
}

impl Managed {
    /// Kind of the wrapped resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Ride(_) => ResourceKind::Ride,
            Self::Operator(_) => ResourceKind::Operator,
        }
    }

    /// Metadata of the wrapped resource.
    #[must_use]
    pub const fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Ride(r) => &r.metadata,
            Self::Operator(o) => &o.metadata,
        }
    }

    /// Mutable metadata, for the store's bookkeeping.
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Ride(r) => &mut r.metadata,
            Self::Operator(o) => &mut o.metadata,
        }
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Store key of the wrapped resource.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind(), self.name())
    }

    /// Observed state of the wrapped resource.
    #[must_use]
    pub fn status(&self) -> ManagedStatus {
        match self {
            Self::Ride(r) => ManagedStatus::Ride(r.status.clone()),
            Self::Operator(o) => ManagedStatus::Operator(o.status.clone()),
        }
    }

    /// Copy of this resource carrying `status`, if the kinds agree.
    #[must_use]
    pub fn with_status(&self, status: ManagedStatus) -> Option<Self> {
        match (self, status) {
            (Self::Ride(r), ManagedStatus::Ride(s)) => Some(Self::Ride(r.with_status(s))),
            (Self::Operator(o), ManagedStatus::Operator(s)) => {
                Some(Self::Operator(o.with_status(s)))
            }
            _ => None,
        }
    }

    /// Copy of this resource with the desired state of `other`, keeping
    /// identity, status and bookkeeping.
    #[must_use]
    pub fn with_spec_of(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Ride(current), Self::Ride(desired)) => Some(Self::Ride(Ride {
                spec: desired.spec.clone(),
                ..current.clone()
            })),
            (Self::Operator(current), Self::Operator(desired)) => {
                Some(Self::Operator(Operator {
                    spec: desired.spec.clone(),
                    ..current.clone()
                }))
            }
            _ => None,
        }
    }

    /// Check whether desired state differs from `other`.
    #[must_use]
    pub fn spec_differs(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ride(a), Self::Ride(b)) => a.spec != b.spec,
            (Self::Operator(a), Self::Operator(b)) => a.spec != b.spec,
            _ => true,
        }
    }
}

impl From<Ride> for Managed {
    fn from(ride: Ride) -> Self {
        Self::Ride(ride)
    }
}

impl From<Operator> for Managed {
    fn from(operator: Operator) -> Self {
        Self::Operator(operator)
    }
}

/// Observed state of any managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ManagedStatus {
    Ride(RideStatus),
    Operator(OperatorStatus),
}

impl ManagedStatus {
    /// Kind whose status this is.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Ride(_) => ResourceKind::Ride,
            Self::Operator(_) => ResourceKind::Operator,
        }
    }

    /// The same status with its conditions replaced.
    #[must_use]
    pub fn with_conditions(self, conditions: ConditionSet) -> Self {
        match self {
            Self::Ride(s) => Self::Ride(RideStatus { conditions, ..s }),
            Self::Operator(_) => Self::Operator(OperatorStatus { conditions }),
        }
    }

    /// Conditions of the wrapped status.
    #[must_use]
    pub const fn conditions(&self) -> &ConditionSet {
        match self {
            Self::Ride(s) => &s.conditions,
            Self::Operator(s) => &s.conditions,
        }
    }
}

/// Compile-time link between a resource type and its slot in the union.
pub trait ManagedResource: Clone + Send + Sync + 'static {
    /// Observed-state type of this resource.
    type Status: Clone + Send + Sync + 'static;

    /// Kind identifier.
    const KIND: ResourceKind;

    /// Borrow the typed resource out of the union, if it is this kind.
    fn from_managed(managed: &Managed) -> Option<&Self>;

    /// Current observed state.
    fn status(&self) -> &Self::Status;

    /// Wrap an observed state of this kind into the union.
    fn wrap_status(status: Self::Status) -> ManagedStatus;
}

impl ManagedResource for Ride {
    type Status = RideStatus;

    const KIND: ResourceKind = ResourceKind::Ride;

    fn from_managed(managed: &Managed) -> Option<&Self> {
        match managed {
            Managed::Ride(r) => Some(r),
            Managed::Operator(_) => None,
        }
    }

    fn status(&self) -> &RideStatus {
        &self.status
    }

    fn wrap_status(status: RideStatus) -> ManagedStatus {
        ManagedStatus::Ride(status)
    }
}

impl ManagedResource for Operator {
    type Status = OperatorStatus;

    const KIND: ResourceKind = ResourceKind::Operator;

    fn from_managed(managed: &Managed) -> Option<&Self> {
        match managed {
            Managed::Operator(o) => Some(o),
            Managed::Ride(_) => None,
        }
    }

    fn status(&self) -> &OperatorStatus {
        &self.status
    }

    fn wrap_status(status: OperatorStatus) -> ManagedStatus {
        ManagedStatus::Operator(status)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk() {
        let gvk = ResourceKind::Ride.gvk();
        assert_eq!(gvk.kind, "Ride");
        assert_eq!(gvk.api_version(), "themepark.n3wscott.com/v1alpha1");
        assert_ne!(ResourceKind::Ride.gvk(), ResourceKind::Operator.gvk());
    }

    #[test]
    fn test_operator_serves() {
        let op = Operator::new("op1", 20, Some("coaster"));
        assert!(op.serves("coaster"));
        assert!(!op.serves("carousel"));

        let idle = Operator::new("op2", 20, None);
        assert!(!idle.serves("coaster"));
    }

    #[test]
    fn test_typed_reference() {
        let op = Operator::new("op1", 20, Some("coaster"));
        let reference = op.typed_reference();
        assert_eq!(reference.kind, "Operator");
        assert_eq!(reference.name, "op1");
        assert_eq!(reference.uid, op.metadata.uid);
    }

    #[test]
    fn test_with_status_rejects_mismatched_kind() {
        let ride = Managed::from(Ride::new("coaster", "roller-coaster", 4));
        let status = ManagedStatus::Operator(OperatorStatus::default());
        assert!(ride.with_status(status).is_none());
    }

    #[test]
    fn test_with_spec_of_keeps_identity_and_status() {
        let mut current = Ride::new("coaster", "roller-coaster", 4);
        current.status.riders_per_hour = 80;
        let desired = Ride::new("coaster", "roller-coaster", 6);

        let merged = Managed::from(current.clone()).with_spec_of(&Managed::from(desired));
        let Some(Managed::Ride(merged)) = merged else {
            panic!("expected a ride");
        };
        assert_eq!(merged.spec.capacity, 6);
        assert_eq!(merged.metadata.uid, current.metadata.uid);
        assert_eq!(merged.status.riders_per_hour, 80);
    }

    #[test]
    fn test_from_managed() {
        let managed = Managed::from(Operator::new("op1", 5, None));
        assert!(Operator::from_managed(&managed).is_some());
        assert!(Ride::from_managed(&managed).is_none());
    }
}
