//! Relationship resolution between Rides and the Operators serving them.

use themepark_core::{Operator, Ride};

/// Find the Operator assigned to the named Ride.
///
/// Scans `operators` in the order given, overwriting on every match, so
/// when several operators reference the same ride the *last* one wins.
/// Uniqueness of assignment is not enforced; use [`assigned_operators`]
/// to detect duplicates.
#[must_use]
pub fn resolve_operator<'a>(ride_name: &str, operators: &'a [Operator]) -> Option<&'a Operator> {
    operators
        .iter()
        .fold(None, |found, o| if o.serves(ride_name) { Some(o) } else { found })
}

/// Every Operator referencing the named Ride, in scan order.
#[must_use]
pub fn assigned_operators<'a>(ride_name: &str, operators: &'a [Operator]) -> Vec<&'a Operator> {
    operators.iter().filter(|o| o.serves(ride_name)).collect()
}

/// Throughput of a ride run by `operator`, or zero when unstaffed.
#[must_use]
pub fn riders_per_hour(ride: &Ride, operator: Option<&Operator>) -> u64 {
    operator.map_or(0, |o| {
        u64::from(ride.spec.capacity).saturating_mul(u64::from(o.spec.frequency))
    })
}
