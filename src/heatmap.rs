//! Pickup density per taxi zone.

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::trips::TripRecord;

/// Number of cleaned trips picked up in one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneCount {
    pub location_id: String,
    pub trip_counts: u64,
}

/// Counts trips per pickup zone, busiest first. Zones without pickups are
/// absent rather than zero.
pub fn pickup_counts(trips: &[TripRecord]) -> Vec<ZoneCount> {
    let mut counts: HashMap<u32, u64> = HashMap::new();
    for trip in trips {
        *counts.entry(trip.pickup_zone).or_default() += 1;
    }

    let mut counts: Vec<(u32, u64)> = counts.into_iter().collect();
    counts.sort_by_key(|&(zone, n)| (Reverse(n), zone));

    counts
        .into_iter()
        .map(|(zone, n)| ZoneCount {
            location_id: zone.to_string(),
            trip_counts: n,
        })
        .collect()
}

/// Largest count, or 0 when there are none.
pub fn max_count(counts: &[ZoneCount]) -> u64 {
    counts.iter().map(|c| c.trip_counts).max().unwrap_or(0)
}
