//! Taxi zone boundaries, display labels and approximate centroids.

use anyhow::{Context, Result, bail};
use geo_types::Coord;
use geojson::{Feature, FeatureCollection, GeoJson, JsonValue, Position};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const LOCATION_ID_PROPERTY: &str = "location_id";
pub const ZONE_PROPERTY: &str = "zone";
pub const BOROUGH_PROPERTY: &str = "borough";

/// A taxi dispatch zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub borough: String,
    /// Mean of the first ring's vertices. Cheap, but not the area centroid.
    pub centroid: Coord<f64>,
}

impl Zone {
    pub fn label(&self) -> String {
        format!("{}, {}", self.name, self.borough)
    }
}

/// Zone lookup keyed by string id, plus the boundary collection it was read
/// from with every `location_id` rewritten as a string.
#[derive(Debug, Clone)]
pub struct ZoneTable {
    zones: BTreeMap<String, Zone>,
    collection: FeatureCollection,
}

impl ZoneTable {
    #[tracing::instrument(fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading zone file {}", path.display()))?;
        let table = Self::from_geojson_str(&content)
            .with_context(|| format!("parsing zone file {}", path.display()))?;
        info!(zones = table.len(), "Zone table loaded");
        Ok(table)
    }

    pub fn from_geojson_str(content: &str) -> Result<Self> {
        let mut collection = match content.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(fc) => fc,
            _ => bail!("zone geojson must be a FeatureCollection"),
        };

        let mut zones = BTreeMap::new();
        for (n, feature) in collection.features.iter_mut().enumerate() {
            let zone = zone_from_feature(feature).with_context(|| format!("zone feature {n}"))?;
            feature.set_property(LOCATION_ID_PROPERTY, zone.id.clone());
            zones.insert(zone.id.clone(), zone);
        }

        Ok(Self { zones, collection })
    }

    pub fn get(&self, id: &str) -> Option<&Zone> {
        self.zones.get(id)
    }

    pub fn label(&self, id: &str) -> Option<String> {
        self.get(id).map(Zone::label)
    }

    pub fn centroid(&self, id: &str) -> Option<Coord<f64>> {
        self.get(id).map(|z| z.centroid)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn collection(&self) -> &FeatureCollection {
        &self.collection
    }

    /// A copy of the boundary collection restricted to the given ids.
    pub fn subset<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> FeatureCollection {
        let wanted: Vec<&str> = ids.into_iter().collect();
        FeatureCollection {
            bbox: None,
            features: self
                .collection
                .features
                .iter()
                .filter(|f| {
                    f.property(LOCATION_ID_PROPERTY)
                        .and_then(JsonValue::as_str)
                        .is_some_and(|id| wanted.contains(&id))
                })
                .cloned()
                .collect(),
            foreign_members: None,
        }
    }
}

fn zone_from_feature(feature: &Feature) -> Result<Zone> {
    let id = feature
        .property(LOCATION_ID_PROPERTY)
        .context("missing location_id")
        .and_then(location_id_string)?;
    let name = string_property(feature, ZONE_PROPERTY)?;
    let borough = string_property(feature, BOROUGH_PROPERTY)?;

    let geometry = feature
        .geometry
        .as_ref()
        .with_context(|| format!("zone {id} has no geometry"))?;
    let centroid = ring_mean(first_ring(&geometry.value)?)
        .with_context(|| format!("zone {id} has an empty boundary"))?;

    Ok(Zone {
        id,
        name,
        borough,
        centroid,
    })
}

/// Zone ids arrive as numbers or strings; joins are always by string.
pub fn location_id_string(value: &JsonValue) -> Result<String> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.to_string())
            } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0) {
                Ok(format!("{f:.0}"))
            } else {
                Ok(n.to_string())
            }
        }
        other => bail!("location_id must be a number or string, got {other}"),
    }
}

fn string_property(feature: &Feature, key: &str) -> Result<String> {
    match feature.property(key) {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Null) | None => bail!("missing {key}"),
        Some(other) => Ok(other.to_string()),
    }
}

/// The exterior ring of a polygon, or of the first member of a multipolygon.
fn first_ring(value: &geojson::Value) -> Result<&[Position]> {
    let ring = match value {
        geojson::Value::Polygon(rings) => rings.first(),
        geojson::Value::MultiPolygon(polygons) => polygons.first().and_then(|rings| rings.first()),
        _ => bail!("zone geometry must be a Polygon or MultiPolygon"),
    };
    ring.map(Vec::as_slice).context("polygon has no rings")
}

fn ring_mean(ring: &[Position]) -> Option<Coord<f64>> {
    if ring.is_empty() {
        return None;
    }
    let n = ring.len() as f64;
    let (sx, sy) = ring.iter().try_fold((0.0_f64, 0.0_f64), |(sx, sy), p| {
        Some((sx + p.first()?, sy + p.get(1)?))
    })?;
    Some(Coord { x: sx / n, y: sy / n })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ZONES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"location_id": 1, "zone": "Alpha", "borough": "Manhattan"},
                "geometry": {"type": "Polygon", "coordinates": [
                    [[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]],
                    [[9.0, 9.0], [9.5, 9.0], [9.5, 9.5]]
                ]}
            },
            {
                "type": "Feature",
                "properties": {"location_id": "2", "zone": "Beta", "borough": "Queens"},
                "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[10.0, 20.0], [12.0, 20.0], [11.0, 23.0]]],
                    [[[50.0, 50.0], [51.0, 50.0], [51.0, 51.0]]]
                ]}
            }
        ]
    }"#;

    #[test]
    fn test_polygon_centroid_uses_exterior_ring() {
        let table = ZoneTable::from_geojson_str(ZONES).unwrap();
        let c = table.centroid("1").unwrap();
        assert_relative_eq!(c.x, 1.0);
        assert_relative_eq!(c.y, 1.0);
    }

    #[test]
    fn test_multipolygon_centroid_uses_first_polygon() {
        let table = ZoneTable::from_geojson_str(ZONES).unwrap();
        let c = table.centroid("2").unwrap();
        assert_relative_eq!(c.x, 11.0);
        assert_relative_eq!(c.y, 21.0);
    }

    #[test]
    fn test_labels_and_string_ids() {
        let table = ZoneTable::from_geojson_str(ZONES).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.label("1").as_deref(), Some("Alpha, Manhattan"));
        assert_eq!(table.label("2").as_deref(), Some("Beta, Queens"));
        assert!(table.get("3").is_none());

        for feature in &table.collection().features {
            assert!(feature.property(LOCATION_ID_PROPERTY).unwrap().is_string());
        }
    }

    #[test]
    fn test_subset_keeps_requested_zones() {
        let table = ZoneTable::from_geojson_str(ZONES).unwrap();
        let subset = table.subset(["2"]);
        assert_eq!(subset.features.len(), 1);
        assert_eq!(
            subset.features[0].property(LOCATION_ID_PROPERTY).unwrap(),
            &JsonValue::from("2")
        );
    }

    #[test]
    fn test_location_id_string_forms() {
        assert_eq!(location_id_string(&serde_json::json!(42)).unwrap(), "42");
        assert_eq!(location_id_string(&serde_json::json!(42.0)).unwrap(), "42");
        assert_eq!(location_id_string(&serde_json::json!("7")).unwrap(), "7");
        assert!(location_id_string(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn test_missing_geometry_is_error() {
        let content = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"location_id": 1, "zone": "A", "borough": "B"}, "geometry": null}
        ]}"#;
        assert!(ZoneTable::from_geojson_str(content).is_err());
    }

    #[test]
    fn test_missing_properties_are_errors() {
        for properties in [
            r#"{"location_id": 1, "borough": "Bronx"}"#,
            r#"{"location_id": 1, "zone": "A", "borough": null}"#,
            r#"{"location_id": null, "zone": "A", "borough": "Bronx"}"#,
            r#"{"zone": "A", "borough": "Bronx"}"#,
        ] {
            let content = format!(
                r#"{{"type": "FeatureCollection", "features": [
                    {{"type": "Feature", "properties": {properties},
                     "geometry": {{"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]]}}}}
                ]}}"#
            );
            assert!(ZoneTable::from_geojson_str(&content).is_err(), "{properties}");
        }
    }

    #[test]
    fn test_not_a_collection_is_error() {
        let content = r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#;
        assert!(ZoneTable::from_geojson_str(content).is_err());
    }
}
