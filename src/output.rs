//! Route summaries and CSV export.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use crate::flows::RankedFlow;

/// One exported top-route row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRow {
    pub rank: usize,
    pub pickup_id: String,
    pub dropoff_id: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub trip_count: u64,
    pub percentage: f64,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
}

pub fn pct(part: u64, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

/// Formats a count with `,` thousands separators.
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn flow_rows(flows: &[RankedFlow], total_trips: usize) -> Vec<FlowRow> {
    flows
        .iter()
        .enumerate()
        .map(|(i, f)| FlowRow {
            rank: i + 1,
            pickup_id: f.pickup_id.clone(),
            dropoff_id: f.dropoff_id.clone(),
            pickup_location: f.pickup_location.clone(),
            dropoff_location: f.dropoff_location.clone(),
            trip_count: f.trip_count,
            percentage: pct(f.trip_count, total_trips),
            pickup_lat: f.pickup.y,
            pickup_lon: f.pickup.x,
            dropoff_lat: f.dropoff.y,
            dropoff_lon: f.dropoff.x,
        })
        .collect()
}

/// Logs the ranked routes with their share of all cleaned trips.
pub fn log_top_routes(flows: &[RankedFlow], total_trips: usize) {
    info!(shown = flows.len(), total_trips, "Most frequent taxi routes");
    for row in flow_rows(flows, total_trips) {
        info!(
            rank = row.rank,
            from = %row.pickup_location,
            to = %row.dropoff_location,
            trips = %format_count(row.trip_count),
            percentage = %format!("{:.2}%", row.percentage),
            ids = %format!("{} -> {}", row.pickup_id, row.dropoff_id),
            "Route"
        );
    }
}

/// Writes `rows` to a fresh CSV file with a header line.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    debug!(path = %path.display(), rows = rows.len(), "Writing CSV");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}
