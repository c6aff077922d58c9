//! Status conditions and the lifecycle state machine that produces them.
//!
//! A resource carries at most one [`Condition`] per [`ConditionType`].
//! Conditions are never mutated in place: [`ConditionSet::transition`]
//! maps `(current, event)` to a new set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of status flag a condition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Whether the external counterpart is ready for use.
    Ready,
    /// Whether a Ride is staffed and running.
    Operational,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "Ready",
            Self::Operational => "Operational",
        };
        write!(f, "{s}")
    }
}

/// Boolean-ish condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Machine-readable reason attached to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionReason {
    Creating,
    Available,
    Deleting,
    Operating,
    ShortStaffed,
}

impl ConditionReason {
    /// Wire representation of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Available => "Available",
            Self::Deleting => "Deleting",
            Self::Operating => "Operating",
            Self::ShortStaffed => "ShortStaffed",
        }
    }
}

impl std::fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, timestamped status flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    pub last_transition_time: DateTime<Utc>,
}

/// Lifecycle events that drive condition transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// A client is being connected for this resource.
    Connecting,
    /// The external counterpart is being created.
    Creating,
    /// The external counterpart exists and is usable.
    Available,
    /// A Ride has an operator assigned.
    Operating,
    /// A Ride has no operator assigned.
    ShortStaffed,
    /// The external counterpart is being torn down.
    Deleting,
}

impl LifecycleEvent {
    /// Condition produced by this event, stamped with `now`.
    #[must_use]
    pub fn condition(self, now: DateTime<Utc>) -> Condition {
        let (condition_type, status, reason) = match self {
            Self::Connecting => (
                ConditionType::Ready,
                ConditionStatus::Unknown,
                ConditionReason::Creating,
            ),
            Self::Creating => (
                ConditionType::Ready,
                ConditionStatus::False,
                ConditionReason::Creating,
            ),
            Self::Available => (
                ConditionType::Ready,
                ConditionStatus::True,
                ConditionReason::Available,
            ),
            Self::Operating => (
                ConditionType::Operational,
                ConditionStatus::True,
                ConditionReason::Operating,
            ),
            Self::ShortStaffed => (
                ConditionType::Operational,
                ConditionStatus::False,
                ConditionReason::ShortStaffed,
            ),
            Self::Deleting => (
                ConditionType::Ready,
                ConditionStatus::False,
                ConditionReason::Deleting,
            ),
        };
        Condition {
            condition_type,
            status,
            reason,
            last_transition_time: now,
        }
    }
}

/// Condition for a client being connected.
#[must_use]
pub fn connecting() -> Condition {
    LifecycleEvent::Connecting.condition(Utc::now())
}

/// Condition for an external counterpart being created.
#[must_use]
pub fn creating() -> Condition {
    LifecycleEvent::Creating.condition(Utc::now())
}

/// Condition for an available external counterpart.
#[must_use]
pub fn available() -> Condition {
    LifecycleEvent::Available.condition(Utc::now())
}

/// Condition for a staffed Ride.
#[must_use]
pub fn operating() -> Condition {
    LifecycleEvent::Operating.condition(Utc::now())
}

/// Condition for a Ride without an operator.
#[must_use]
pub fn short_staffed() -> Condition {
    LifecycleEvent::ShortStaffed.condition(Utc::now())
}

/// Condition for an external counterpart being deleted.
#[must_use]
pub fn deleting() -> Condition {
    LifecycleEvent::Deleting.condition(Utc::now())
}

/// Conditions of one resource, keyed by type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(BTreeMap<ConditionType, Condition>);

impl ConditionSet {
    /// Create an empty condition set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new set with `condition` merged in.
    ///
    /// An existing condition of the same type is replaced. Its transition
    /// time is kept when the status did not change.
    #[must_use]
    pub fn with(&self, condition: Condition) -> Self {
        let mut conditions = self.0.clone();
        let merged = match conditions.get(&condition.condition_type) {
            Some(existing) if existing.status == condition.status => Condition {
                last_transition_time: existing.last_transition_time,
                ..condition
            },
            _ => condition,
        };
        conditions.insert(merged.condition_type, merged);
        Self(conditions)
    }

    /// Transition function: apply a lifecycle event at `now`.
    #[must_use]
    pub fn transition(&self, event: LifecycleEvent, now: DateTime<Utc>) -> Self {
        self.with(event.condition(now))
    }

    /// Re-apply these conditions on top of `persisted`.
    ///
    /// Transition times are then measured against the last stored state
    /// rather than against intermediate states of the same pass.
    #[must_use]
    pub fn settled_against(&self, persisted: &Self) -> Self {
        self.iter()
            .fold(persisted.clone(), |set, condition| set.with(condition.clone()))
    }

    /// Get the condition of the given type.
    #[must_use]
    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.0.get(&condition_type)
    }

    /// Iterate conditions in type order.
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    /// Number of conditions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no condition has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check whether the given type currently has `status` and `reason`.
    #[must_use]
    pub fn has(
        &self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: ConditionReason,
    ) -> bool {
        self.get(condition_type)
            .is_some_and(|c| c.status == status && c.reason == reason)
    }
}
