//! Origin-destination flow ranking for the top-routes view.

use geo_types::{Coord, LineString};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::bezier::{ARROW_POSITIONS, ArrowMarker, DEFAULT_SAMPLES, arrow_markers, bezier_path};
use crate::trips::TripRecord;
use crate::zones::ZoneTable;

pub const DEFAULT_TOP_N: usize = 10;

/// Curvature for a flow whose reverse is also displayed.
pub const PAIRED_CURVATURE: f64 = 0.2;
pub const SINGLE_CURVATURE: f64 = 0.1;

/// Trip count between two zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub pickup_zone: u32,
    pub dropoff_zone: u32,
    pub trip_count: u64,
}

/// A displayed flow with zone labels and centroids resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFlow {
    pub pickup_id: String,
    pub dropoff_id: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub trip_count: u64,
    pub pickup: Coord<f64>,
    pub dropoff: Coord<f64>,
}

/// Unordered zone pair.
pub type PairKey = (String, String);

impl RankedFlow {
    pub fn pair_key(&self) -> PairKey {
        if self.pickup_id <= self.dropoff_id {
            (self.pickup_id.clone(), self.dropoff_id.clone())
        } else {
            (self.dropoff_id.clone(), self.pickup_id.clone())
        }
    }

    pub fn is_reverse_of(&self, other: &RankedFlow) -> bool {
        self.pickup_id == other.dropoff_id && self.dropoff_id == other.pickup_id
    }
}

/// Sampled arc and arrows for one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowPath {
    pub curvature: f64,
    pub path: LineString<f64>,
    pub arrows: Vec<ArrowMarker>,
}

impl FlowPath {
    pub fn build(flow: &RankedFlow, curvature: f64) -> Self {
        let path = bezier_path(flow.pickup, flow.dropoff, curvature, DEFAULT_SAMPLES);
        let arrows = arrow_markers(&path, &ARROW_POSITIONS);
        Self {
            curvature,
            path,
            arrows,
        }
    }
}

/// Counts trips per (pickup, dropoff) pair, busiest first. Equal counts keep
/// ascending pair order.
pub fn aggregate_flows(trips: &[TripRecord]) -> Vec<Flow> {
    let mut counts: BTreeMap<(u32, u32), u64> = BTreeMap::new();
    for t in trips {
        *counts.entry((t.pickup_zone, t.dropoff_zone)).or_default() += 1;
    }

    let mut flows: Vec<Flow> = counts
        .into_iter()
        .map(|((pickup_zone, dropoff_zone), trip_count)| Flow {
            pickup_zone,
            dropoff_zone,
            trip_count,
        })
        .collect();
    flows.sort_by_key(|f| Reverse(f.trip_count));
    flows
}

/// The `top_n` busiest flows whose zones are both known.
///
/// Flows with an unknown zone are dropped after ranking, not replaced, so
/// fewer than `top_n` may come back.
#[tracing::instrument(skip(trips, zones), fields(trips = trips.len()))]
pub fn top_routes(trips: &[TripRecord], zones: &ZoneTable, top_n: usize) -> Vec<RankedFlow> {
    let ranked: Vec<RankedFlow> = aggregate_flows(trips)
        .into_iter()
        .take(top_n)
        .filter_map(|f| {
            let resolved = resolve(&f, zones);
            if resolved.is_none() {
                debug!(
                    pickup = f.pickup_zone,
                    dropoff = f.dropoff_zone,
                    "Flow zone missing from zone table, dropped"
                );
            }
            resolved
        })
        .collect();

    info!(requested = top_n, shown = ranked.len(), "Top routes ranked");
    ranked
}

fn resolve(flow: &Flow, zones: &ZoneTable) -> Option<RankedFlow> {
    let pickup_id = flow.pickup_zone.to_string();
    let dropoff_id = flow.dropoff_zone.to_string();
    let pickup = zones.get(&pickup_id)?;
    let dropoff = zones.get(&dropoff_id)?;

    Some(RankedFlow {
        pickup_location: pickup.label(),
        dropoff_location: dropoff.label(),
        pickup: pickup.centroid,
        dropoff: dropoff.centroid,
        trip_count: flow.trip_count,
        pickup_id,
        dropoff_id,
    })
}

/// Unordered pairs for which both directions are present in `flows`.
pub fn bidirectional_pairs(flows: &[RankedFlow]) -> HashSet<PairKey> {
    let mut pairs = HashSet::new();
    for (i, a) in flows.iter().enumerate() {
        for b in &flows[i + 1..] {
            if a.is_reverse_of(b) {
                pairs.insert(a.pair_key());
            }
        }
    }
    pairs
}

pub fn curvature_factor(flow: &RankedFlow, pairs: &HashSet<PairKey>) -> f64 {
    if pairs.contains(&flow.pair_key()) {
        PAIRED_CURVATURE
    } else {
        SINGLE_CURVATURE
    }
}

/// Arc geometry for every flow, with paired flows bent further apart.
pub fn flow_paths(flows: &[RankedFlow]) -> Vec<FlowPath> {
    let pairs = bidirectional_pairs(flows);
    flows
        .iter()
        .map(|f| FlowPath::build(f, curvature_factor(f, &pairs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::month::YearMonth;
    use chrono::NaiveDate;

    const ZONES: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"location_id": 1, "zone": "A", "borough": "Manhattan"},
         "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]}},
        {"type": "Feature", "properties": {"location_id": 2, "zone": "B", "borough": "Manhattan"},
         "geometry": {"type": "Polygon", "coordinates": [[[4.0, 0.0], [5.0, 0.0], [5.0, 1.0], [4.0, 1.0]]]}},
        {"type": "Feature", "properties": {"location_id": 3, "zone": "C", "borough": "Queens"},
         "geometry": {"type": "Polygon", "coordinates": [[[0.0, 4.0], [1.0, 4.0], [1.0, 5.0], [0.0, 5.0]]]}}
    ]}"#;

    fn zones() -> ZoneTable {
        ZoneTable::from_geojson_str(ZONES).unwrap()
    }

    fn trips(pairs: &[((u32, u32), usize)]) -> Vec<TripRecord> {
        let t = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        pairs
            .iter()
            .flat_map(|&((pu, du), n)| {
                std::iter::repeat_n(
                    TripRecord {
                        pickup: t,
                        dropoff: t + chrono::Duration::minutes(12),
                        pickup_zone: pu,
                        dropoff_zone: du,
                        duration_minutes: 12.0,
                        month: YearMonth::new(2024, 1).unwrap(),
                    },
                    n,
                )
            })
            .collect()
    }

    #[test]
    fn test_top_two_of_mixed_flows() {
        let trips = trips(&[((1, 2), 50), ((2, 1), 40), ((1, 3), 5)]);
        let top = top_routes(&trips, &zones(), 2);

        let got: Vec<_> = top
            .iter()
            .map(|f| (f.pickup_id.as_str(), f.dropoff_id.as_str(), f.trip_count))
            .collect();
        assert_eq!(got, vec![("1", "2", 50), ("2", "1", 40)]);

        let pairs = bidirectional_pairs(&top);
        assert_eq!(curvature_factor(&top[0], &pairs), PAIRED_CURVATURE);
        assert_eq!(curvature_factor(&top[1], &pairs), PAIRED_CURVATURE);
    }

    #[test]
    fn test_ranking_descending_and_stable() {
        let trips = trips(&[((3, 1), 7), ((1, 2), 7), ((2, 2), 9), ((1, 3), 7), ((2, 3), 1)]);
        let flows = aggregate_flows(&trips);

        for w in flows.windows(2) {
            assert!(w[0].trip_count >= w[1].trip_count);
        }
        let order: Vec<_> = flows.iter().map(|f| (f.pickup_zone, f.dropoff_zone)).collect();
        assert_eq!(order, vec![(2, 2), (1, 2), (1, 3), (3, 1), (2, 3)]);
    }

    #[test]
    fn test_unknown_zones_dropped_not_refilled() {
        let trips = trips(&[((1, 99), 30), ((1, 2), 20), ((2, 3), 10)]);
        let top = top_routes(&trips, &zones(), 2);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].pickup_id, "1");
        assert_eq!(top[0].dropoff_id, "2");
        assert_eq!(top[0].pickup_location, "A, Manhattan");
        assert_eq!(top[0].pickup, Coord { x: 0.5, y: 0.5 });
    }

    #[test]
    fn test_unpaired_flows_use_single_curvature() {
        let trips = trips(&[((1, 2), 5), ((2, 3), 4), ((3, 1), 3)]);
        let top = top_routes(&trips, &zones(), 10);
        let pairs = bidirectional_pairs(&top);
        assert!(pairs.is_empty());
        for f in &top {
            assert_eq!(curvature_factor(f, &pairs), SINGLE_CURVATURE);
        }
    }

    #[test]
    fn test_pair_detection_symmetric() {
        let forward = trips(&[((1, 2), 10), ((2, 1), 8), ((1, 3), 6)]);
        let backward = trips(&[((2, 1), 10), ((1, 2), 8), ((1, 3), 6)]);
        for t in [forward, backward] {
            let top = top_routes(&t, &zones(), 3);
            let pairs = bidirectional_pairs(&top);
            assert_eq!(pairs.len(), 1);
            assert!(pairs.contains(&("1".to_string(), "2".to_string())));
            let curvatures: Vec<_> = top.iter().map(|f| curvature_factor(f, &pairs)).collect();
            assert_eq!(curvatures, vec![PAIRED_CURVATURE, PAIRED_CURVATURE, SINGLE_CURVATURE]);
        }
    }

    #[test]
    fn test_flow_paths_connect_centroids() {
        let trips = trips(&[((1, 2), 3), ((2, 1), 2)]);
        let top = top_routes(&trips, &zones(), 2);
        let paths = flow_paths(&top);

        assert_eq!(paths.len(), 2);
        for (flow, fp) in top.iter().zip(&paths) {
            assert_eq!(fp.curvature, PAIRED_CURVATURE);
            assert_eq!(fp.path.0.len(), DEFAULT_SAMPLES);
            assert_eq!(fp.path.0[0], flow.pickup);
            assert_eq!(*fp.path.0.last().unwrap(), flow.dropoff);
            assert_eq!(fp.arrows.len(), ARROW_POSITIONS.len());
        }
    }
}
