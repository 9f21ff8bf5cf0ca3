//! Interactive map figures.
//!
//! A [`Figure`] is a list of plotly traces plus a layout. It is written as a
//! standalone HTML page that loads plotly.js and draws the map on open.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::Path;
use tracing::info;

use crate::flows::{FlowPath, RankedFlow};
use crate::heatmap::{ZoneCount, max_count};
use crate::output::format_count;
use crate::palette::{DENSITY_SCALE, MAP_STYLE, TOUCHED_ZONE_FILL, route_color};
use crate::transit::{FeedKind, RouteShape};
use crate::zones::ZoneTable;

const PLOTLY_JS: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";
const FEATURE_ID_KEY: &str = "properties.location_id";

/// Initial camera of a map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapView {
    pub zoom: f64,
    pub lat: f64,
    pub lon: f64,
}

impl MapView {
    /// Whole city.
    pub const CITY: MapView = MapView {
        zoom: 9.0,
        lat: 40.7128,
        lon: -74.0060,
    };
    /// Midtown Manhattan, for transit overlays.
    pub const MIDTOWN: MapView = MapView {
        zoom: 11.0,
        lat: 40.7637,
        lon: -73.9814,
    };
    /// Close-up for the top routes.
    pub const ROUTES: MapView = MapView {
        zoom: 12.0,
        lat: 40.76,
        lon: -74.0,
    };

    fn mapbox(&self) -> Value {
        json!({
            "style": MAP_STYLE,
            "zoom": self.zoom,
            "center": {"lat": self.lat, "lon": self.lon},
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Figure {
    pub data: Vec<Value>,
    pub layout: Value,
}

impl Figure {
    pub fn new(view: MapView) -> Self {
        Self {
            data: Vec::new(),
            layout: json!({
                "mapbox": view.mapbox(),
                "margin": {"r": 0, "t": 0, "l": 0, "b": 0},
            }),
        }
    }

    pub fn push(&mut self, trace: Value) {
        self.data.push(trace);
    }

    fn set_layout(&mut self, key: &str, value: Value) {
        if let Some(layout) = self.layout.as_object_mut() {
            layout.insert(key.to_string(), value);
        }
    }

    pub fn to_html(&self, title: &str) -> Result<String> {
        // "</" inside a script body would close the tag early.
        let figure = serde_json::to_string(self)?.replace("</", "<\\/");
        Ok(format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{PLOTLY_JS}"></script>
<style>html, body, #map {{ margin: 0; width: 100%; height: 100%; }}</style>
</head>
<body>
<div id="map"></div>
<script>
const figure = {figure};
Plotly.newPlot("map", figure.data, figure.layout, {{responsive: true}});
</script>
</body>
</html>
"#,
            title = escape_html(title),
        ))
    }

    pub fn write_html(&self, path: &Path, title: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_html(title)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), traces = self.data.len(), "Map written");
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn pickup_choropleth(counts: &[ZoneCount], zones: &ZoneTable, showscale: bool) -> Result<Value> {
    Ok(json!({
        "type": "choroplethmapbox",
        "geojson": serde_json::to_value(zones.collection())?,
        "featureidkey": FEATURE_ID_KEY,
        "locations": counts.iter().map(|c| c.location_id.as_str()).collect::<Vec<_>>(),
        "z": counts.iter().map(|c| c.trip_counts).collect::<Vec<_>>(),
        "zmin": 0,
        "zmax": max_count(counts),
        "colorscale": DENSITY_SCALE,
        "marker": {"opacity": 0.6},
        "showscale": showscale,
        "colorbar": {"title": {"text": "Pickup Counts"}},
        "hovertemplate": "Zone %{location}<br>Pickup Counts: %{z}<extra></extra>",
    }))
}

/// Choropleth of pickups per zone.
pub fn pickup_heatmap(counts: &[ZoneCount], zones: &ZoneTable, view: MapView) -> Result<Figure> {
    let mut fig = Figure::new(view);
    fig.push(pickup_choropleth(counts, zones, true)?);
    Ok(fig)
}

/// One line trace per shape.
pub fn transit_traces(shapes: &[RouteShape], kind: FeedKind) -> Vec<Value> {
    shapes
        .iter()
        .map(|s| {
            let route = s.route_id.as_deref().unwrap_or("unknown");
            json!({
                "type": "scattermapbox",
                "mode": "lines",
                "lon": s.line.coords().map(|c| c.x).collect::<Vec<_>>(),
                "lat": s.line.coords().map(|c| c.y).collect::<Vec<_>>(),
                "line": {"width": kind.line_width(), "color": s.color},
                "name": format!("{} Route {}", kind.label(), route),
            })
        })
        .collect()
}

/// One feed's lines on a bare base map.
pub fn feed_map(shapes: &[RouteShape], kind: FeedKind, view: MapView) -> Figure {
    let mut fig = Figure::new(view);
    fig.data.extend(transit_traces(shapes, kind));
    fig
}

/// Subway and bus lines on a bare base map.
pub fn transit_map(subway: &[RouteShape], bus: &[RouteShape], view: MapView) -> Figure {
    let mut fig = Figure::new(view);
    fig.data.extend(transit_traces(subway, FeedKind::Subway));
    fig.data.extend(transit_traces(bus, FeedKind::Bus));
    fig
}

/// Pickup heatmap with subway and bus lines drawn over it.
pub fn combined_map(
    counts: &[ZoneCount],
    zones: &ZoneTable,
    subway: &[RouteShape],
    bus: &[RouteShape],
    view: MapView,
) -> Result<Figure> {
    let mut fig = Figure::new(view);
    fig.push(pickup_choropleth(counts, zones, false)?);
    fig.data.extend(transit_traces(subway, FeedKind::Subway));
    fig.data.extend(transit_traces(bus, FeedKind::Bus));
    Ok(fig)
}

/// Curved top routes over the zones they touch.
///
/// `paths[i]` is the geometry of `flows[i]`.
pub fn top_routes_map(
    flows: &[RankedFlow],
    paths: &[FlowPath],
    zones: &ZoneTable,
    view: MapView,
) -> Result<Figure> {
    let mut fig = Figure::new(view);

    let mut touched: Vec<&str> = flows
        .iter()
        .flat_map(|f| [f.pickup_id.as_str(), f.dropoff_id.as_str()])
        .collect();
    touched.sort_unstable();
    touched.dedup();

    fig.push(json!({
        "type": "choroplethmapbox",
        "geojson": serde_json::to_value(zones.subset(touched.iter().copied()))?,
        "featureidkey": FEATURE_ID_KEY,
        "locations": touched,
        "z": vec![1; touched.len()],
        "colorscale": [[0, TOUCHED_ZONE_FILL], [1, TOUCHED_ZONE_FILL]],
        "showscale": false,
        "marker": {"opacity": 0.5, "line": {"width": 1}},
        "hoverinfo": "skip",
    }));

    let max_trips = flows.iter().map(|f| f.trip_count).max().unwrap_or(1).max(1) as f64;

    for (i, (flow, fp)) in flows.iter().zip(paths).enumerate() {
        let color = route_color(i);
        let width = 1.0 + (flow.trip_count as f64 / max_trips) * 4.0;

        for arrow in &fp.arrows {
            fig.push(json!({
                "type": "scattermapbox",
                "mode": "markers",
                "lon": [arrow.position.x],
                "lat": [arrow.position.y],
                "marker": {"size": 6, "symbol": "triangle-right", "angle": arrow.angle_deg, "color": color},
                "hoverinfo": "skip",
                "showlegend": false,
            }));
        }

        fig.push(json!({
            "type": "scattermapbox",
            "mode": "lines",
            "lon": fp.path.coords().map(|c| c.x).collect::<Vec<_>>(),
            "lat": fp.path.coords().map(|c| c.y).collect::<Vec<_>>(),
            "line": {"width": width, "color": color},
            "opacity": 0.7,
            "hovertext": format!(
                "Route {}<br>From: {}<br>To: {}<br>Trips: {}",
                i + 1,
                flow.pickup_location,
                flow.dropoff_location,
                format_count(flow.trip_count),
            ),
            "name": format!("Route {}", i + 1),
        }));

        fig.push(json!({
            "type": "scattermapbox",
            "mode": "markers",
            "lon": [flow.pickup.x],
            "lat": [flow.pickup.y],
            "marker": {"size": 8, "color": color, "symbol": "circle"},
            "hovertext": format!("Pickup: {}", flow.pickup_location),
            "showlegend": false,
        }));

        fig.push(json!({
            "type": "scattermapbox",
            "mode": "markers",
            "lon": [flow.dropoff.x],
            "lat": [flow.dropoff.y],
            "marker": {"size": 8, "color": color, "symbol": "square"},
            "hovertext": format!("Dropoff: {}", flow.dropoff_location),
            "showlegend": false,
        }));
    }

    fig.set_layout("showlegend", json!(true));
    fig.set_layout(
        "legend",
        json!({
            "yanchor": "top",
            "y": 0.99,
            "xanchor": "left",
            "x": 0.01,
            "bgcolor": "rgba(255, 255, 255, 0.8)",
        }),
    );

    Ok(fig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::flow_paths;
    use geo_types::LineString;

    const ZONES: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"location_id": 1, "zone": "A", "borough": "Manhattan"},
         "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]]}},
        {"type": "Feature", "properties": {"location_id": 2, "zone": "B", "borough": "Queens"},
         "geometry": {"type": "Polygon", "coordinates": [[[3.0, 0.0], [4.0, 0.0], [4.0, 1.0]]]}},
        {"type": "Feature", "properties": {"location_id": 3, "zone": "C</script>", "borough": "Bronx"},
         "geometry": {"type": "Polygon", "coordinates": [[[6.0, 0.0], [7.0, 0.0], [7.0, 1.0]]]}}
    ]}"#;

    fn flow(pu: &str, du: &str, n: u64, zones: &ZoneTable) -> RankedFlow {
        RankedFlow {
            pickup_id: pu.into(),
            dropoff_id: du.into(),
            pickup_location: zones.label(pu).unwrap(),
            dropoff_location: zones.label(du).unwrap(),
            trip_count: n,
            pickup: zones.centroid(pu).unwrap(),
            dropoff: zones.centroid(du).unwrap(),
        }
    }

    #[test]
    fn test_pickup_heatmap_joins_by_string_id() {
        let zones = ZoneTable::from_geojson_str(ZONES).unwrap();
        let counts = vec![
            ZoneCount {
                location_id: "2".into(),
                trip_counts: 9,
            },
            ZoneCount {
                location_id: "1".into(),
                trip_counts: 4,
            },
        ];
        let fig = pickup_heatmap(&counts, &zones, MapView::CITY).unwrap();

        assert_eq!(fig.data.len(), 1);
        let trace = &fig.data[0];
        assert_eq!(trace["locations"], json!(["2", "1"]));
        assert_eq!(trace["z"], json!([9, 4]));
        assert_eq!(trace["zmax"], json!(9));
        assert_eq!(trace["featureidkey"], json!("properties.location_id"));
        assert_eq!(
            trace["geojson"]["features"][0]["properties"]["location_id"],
            json!("1")
        );
        assert_eq!(fig.layout["mapbox"]["zoom"], json!(9.0));
    }

    #[test]
    fn test_transit_traces_width_and_name() {
        let shape = RouteShape {
            shape_id: "1..N".into(),
            route_id: Some("1".into()),
            color: "#EE352E".into(),
            line: LineString::from(vec![(-74.0, 40.7), (-73.9, 40.8)]),
        };
        let subway = transit_traces(std::slice::from_ref(&shape), FeedKind::Subway);
        assert_eq!(subway[0]["name"], json!("Subway Route 1"));
        assert_eq!(subway[0]["line"]["width"], json!(3.0));
        assert_eq!(subway[0]["lon"], json!([-74.0, -73.9]));

        let bus = transit_traces(&[shape], FeedKind::Bus);
        assert_eq!(bus[0]["name"], json!("Bus Route 1"));
        assert_eq!(bus[0]["line"]["color"], json!("#EE352E"));
    }

    #[test]
    fn test_feed_map_draws_one_feed() {
        let shape = RouteShape {
            shape_id: "M150001".into(),
            route_id: Some("M15".into()),
            color: "#00AEEF".into(),
            line: LineString::from(vec![(-73.9, 40.7), (-73.95, 40.8)]),
        };
        let fig = feed_map(&[shape.clone(), shape], FeedKind::Bus, MapView::CITY);

        assert_eq!(fig.data.len(), 2);
        assert!(fig.data.iter().all(|t| t["line"]["width"] == json!(2.0)));
        assert_eq!(fig.data[0]["name"], json!("Bus Route M15"));
        assert_eq!(fig.layout["mapbox"]["center"]["lat"], json!(40.7128));
    }

    #[test]
    fn test_combined_map_layers() {
        let zones = ZoneTable::from_geojson_str(ZONES).unwrap();
        let counts = vec![ZoneCount {
            location_id: "1".into(),
            trip_counts: 1,
        }];
        let shape = RouteShape {
            shape_id: "s".into(),
            route_id: None,
            color: "#000000".into(),
            line: LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]),
        };
        let fig = combined_map(
            &counts,
            &zones,
            std::slice::from_ref(&shape),
            &[shape.clone(), shape.clone()],
            MapView::MIDTOWN,
        )
        .unwrap();

        assert_eq!(fig.data.len(), 4);
        assert_eq!(fig.data[0]["showscale"], json!(false));
        assert_eq!(fig.data[3]["name"], json!("Bus Route unknown"));
    }

    #[test]
    fn test_top_routes_map_traces() {
        let zones = ZoneTable::from_geojson_str(ZONES).unwrap();
        let flows = vec![flow("1", "2", 50, &zones), flow("2", "1", 25, &zones)];
        let paths = flow_paths(&flows);
        let fig = top_routes_map(&flows, &paths, &zones, MapView::ROUTES).unwrap();

        // zones + per flow (3 arrows + line + pickup + dropoff)
        assert_eq!(fig.data.len(), 1 + 2 * 6);

        let background = &fig.data[0];
        assert_eq!(background["locations"], json!(["1", "2"]));
        assert_eq!(background["geojson"]["features"].as_array().unwrap().len(), 2);

        let line = &fig.data[4];
        assert_eq!(line["name"], json!("Route 1"));
        assert_eq!(line["line"]["width"], json!(5.0));
        assert_eq!(line["line"]["color"], json!(route_color(0)));
        assert_eq!(
            line["hovertext"],
            json!("Route 1<br>From: A, Manhattan<br>To: B, Queens<br>Trips: 50")
        );

        let second_line = &fig.data[10];
        assert_eq!(second_line["line"]["width"], json!(3.0));
        assert_eq!(second_line["line"]["color"], json!(route_color(1)));

        assert_eq!(fig.data[5]["marker"]["symbol"], json!("circle"));
        assert_eq!(fig.data[6]["marker"]["symbol"], json!("square"));
        assert_eq!(fig.layout["showlegend"], json!(true));
    }

    #[test]
    fn test_html_escapes_script_close() {
        let zones = ZoneTable::from_geojson_str(ZONES).unwrap();
        let counts = vec![ZoneCount {
            location_id: "3".into(),
            trip_counts: 2,
        }];
        let fig = pickup_heatmap(&counts, &zones, MapView::CITY).unwrap();
        let html = fig.to_html("Pickups & <Drops>").unwrap();

        assert!(html.contains("<title>Pickups &amp; &lt;Drops&gt;</title>"));
        assert!(html.contains("Plotly.newPlot"));
        assert!(html.contains(PLOTLY_JS));
        assert_eq!(html.matches("</script>").count(), 2);
    }

    #[test]
    fn test_write_html_creates_file() {
        let path = std::env::temp_dir()
            .join("taxi_flow_mapper_test_figure")
            .join("map.html");
        let _ = std::fs::remove_file(&path);

        let mut fig = Figure::new(MapView::CITY);
        fig.push(json!({"type": "scattermapbox", "lon": [1.0], "lat": [2.0]}));
        fig.write_html(&path, "test").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<!DOCTYPE html>"));
        std::fs::remove_file(&path).unwrap();
    }
}
