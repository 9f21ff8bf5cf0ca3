//! Transit route geometry from GTFS static feeds.
//!
//! Subway and bus feeds share one builder: a feed directory holding
//! `routes.txt`, `trips.txt` and `shapes.txt` becomes one polyline per shape
//! id, tagged with the owning route and its display color.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use geo_types::{Coord, LineString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

pub const ROUTES_FILE: &str = "routes.txt";
pub const TRIPS_FILE: &str = "trips.txt";
pub const SHAPES_FILE: &str = "shapes.txt";

pub const DEFAULT_ROUTE_COLOR: &str = "#000000";

/// Borough feeds loaded by default; Manhattan only.
pub const DEFAULT_BUS_SUBDIRS: &[&str] = &["gtfs_m"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Subway,
    Bus,
}

impl FeedKind {
    pub fn label(&self) -> &'static str {
        match self {
            FeedKind::Subway => "Subway",
            FeedKind::Bus => "Bus",
        }
    }

    pub fn line_width(&self) -> f64 {
        match self {
            FeedKind::Subway => 3.0,
            FeedKind::Bus => 2.0,
        }
    }
}

/// One transit shape as a polyline in (lon, lat).
#[derive(Debug, Clone, PartialEq)]
pub struct RouteShape {
    pub shape_id: String,
    pub route_id: Option<String>,
    pub color: String,
    pub line: LineString<f64>,
}

#[derive(Debug, Deserialize)]
struct RouteRow {
    route_id: String,
    route_color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    route_id: String,
    shape_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShapeRow {
    shape_id: String,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: u32,
}

/// Normalizes a GTFS `route_color` to `#RRGGBB`.
///
/// Missing, blank or malformed values yield `fallback`.
pub fn normalize_color(raw: Option<&str>, fallback: &str) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback.to_string();
    };
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("#{hex}")
    } else {
        warn!(color = raw, fallback, "Route color is not six hex digits");
        fallback.to_string()
    }
}

/// Whether `dir` holds all three files a feed needs.
pub fn has_feed_files(dir: &Path) -> bool {
    [ROUTES_FILE, TRIPS_FILE, SHAPES_FILE]
        .iter()
        .all(|f| dir.join(f).is_file())
}

/// Builds one [`RouteShape`] per shape id in `feed_dir`, in ascending shape id
/// order. Shapes whose route is unknown, or whose route has no usable color,
/// get `fallback_color`.
#[tracing::instrument(fields(feed_dir = %feed_dir.display()))]
pub fn build_feed_shapes(feed_dir: &Path, fallback_color: &str) -> Result<Vec<RouteShape>> {
    let fallback = normalize_color(Some(fallback_color), DEFAULT_ROUTE_COLOR);

    let routes: Vec<RouteRow> = read_table(&feed_dir.join(ROUTES_FILE))?;
    let trips: Vec<TripRow> = read_table(&feed_dir.join(TRIPS_FILE))?;
    let points: Vec<ShapeRow> = read_table(&feed_dir.join(SHAPES_FILE))?;

    let mut route_colors: HashMap<String, Option<String>> = HashMap::new();
    for route in routes {
        route_colors.entry(route.route_id).or_insert(route.route_color);
    }

    let mut shape_routes: HashMap<String, String> = HashMap::new();
    for trip in trips {
        if let Some(shape_id) = trip.shape_id {
            shape_routes.entry(shape_id).or_insert(trip.route_id);
        }
    }

    let mut grouped: BTreeMap<String, Vec<(u32, Coord<f64>)>> = BTreeMap::new();
    for p in points {
        grouped.entry(p.shape_id).or_default().push((
            p.shape_pt_sequence,
            Coord {
                x: p.shape_pt_lon,
                y: p.shape_pt_lat,
            },
        ));
    }

    let shapes: Vec<RouteShape> = grouped
        .into_iter()
        .map(|(shape_id, mut pts)| {
            pts.sort_by_key(|(seq, _)| *seq);
            let route_id = shape_routes.get(&shape_id).cloned();
            let raw_color = route_id
                .as_ref()
                .and_then(|r| route_colors.get(r))
                .and_then(|c| c.as_deref());
            let color = normalize_color(raw_color, &fallback);
            RouteShape {
                shape_id,
                route_id,
                color,
                line: pts.into_iter().map(|(_, c)| c).collect(),
            }
        })
        .collect();

    let unmatched = shapes.iter().filter(|s| s.route_id.is_none()).count();
    info!(shapes = shapes.len(), unmatched, "Feed shapes built");

    Ok(shapes)
}

/// Builds shapes for each borough feed under `base_dir`, skipping any
/// subdirectory that lacks a required file.
#[tracing::instrument(skip(subdirs), fields(base_dir = %base_dir.display()))]
pub fn build_bus_shapes<S: AsRef<str>>(
    base_dir: &Path,
    subdirs: &[S],
    fallback_color: &str,
) -> Result<Vec<RouteShape>> {
    let mut all = Vec::new();

    for subdir in subdirs {
        let subdir = subdir.as_ref();
        info!(subdir, "Processing bus feed");

        let dir = base_dir.join(subdir);
        if !has_feed_files(&dir) {
            warn!(subdir, "Missing feed files, skipping");
            continue;
        }

        all.extend(build_feed_shapes(&dir, fallback_color)?);
    }

    if all.is_empty() {
        warn!("No bus shapes loaded");
    }

    Ok(all)
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(file);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result.with_context(|| format!("parsing {}", path.display()))?;
        rows.push(record);
    }

    debug!(path = %path.display(), rows = rows.len(), "Feed table read");
    Ok(rows)
}
