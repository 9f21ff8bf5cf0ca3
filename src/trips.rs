//! Monthly taxi trip loading and cleaning.
//!
//! Trip files are columnar parquet tables named `yellow_tripdata_<YYYY-MM>.parquet`.
//! Only the columns the chosen [`CleaningProfile`] needs are decoded; everything
//! else in the file is skipped by the projection.

use anyhow::{Context, Result, bail};
use arrow::array::{Array, ArrayRef, AsArray, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Float64Type, Int64Type, Schema, TimeUnit, TimestampMicrosecondType,
};
use chrono::{DateTime, NaiveDateTime};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::month::YearMonth;

pub const TRIP_FILE_PREFIX: &str = "yellow_tripdata_";
pub const TRIP_FILE_EXTENSION: &str = "parquet";

pub const PICKUP_COLUMN: &str = "tpep_pickup_datetime";
pub const DROPOFF_COLUMN: &str = "tpep_dropoff_datetime";
pub const PICKUP_ZONE_COLUMN: &str = "PULocationID";
pub const DROPOFF_ZONE_COLUMN: &str = "DOLocationID";

const TRIP_COLUMNS: [&str; 4] = [
    PICKUP_COLUMN,
    DROPOFF_COLUMN,
    PICKUP_ZONE_COLUMN,
    DROPOFF_ZONE_COLUMN,
];

/// Fare record columns read by [`CleaningProfile::Strict`]. Matched without
/// regard to case; older files spell the last one `airport_fee`.
const FARE_COLUMNS: [&str; 15] = [
    "VendorID",
    "passenger_count",
    "trip_distance",
    "RatecodeID",
    "store_and_fwd_flag",
    "payment_type",
    "fare_amount",
    "extra",
    "mta_tax",
    "improvement_surcharge",
    "tip_amount",
    "tolls_amount",
    "total_amount",
    "congestion_surcharge",
    "Airport_fee",
];

/// Columns trimmed at [`OUTLIER_QUANTILE`], in trimming order.
pub const OUTLIER_COLUMNS: [&str; 6] = [
    "trip_distance",
    "fare_amount",
    "extra",
    "tip_amount",
    "tolls_amount",
    "total_amount",
];

pub const MIN_DURATION_MINUTES: f64 = 1.0;
pub const MAX_DURATION_MINUTES: f64 = 60.0;

pub const MIN_TRIP_DISTANCE_MILES: f64 = 0.1;
pub const MTA_TAX: f64 = 0.5;
pub const OUTLIER_QUANTILE: f64 = 0.99;

/// Which columns are read and how strictly rows are checked.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CleaningProfile {
    /// Timestamps and zone ids only.
    #[default]
    Standard,
    /// Also the fare record, for [`clean_trips_strict`].
    Strict,
}

impl CleaningProfile {
    fn columns(self) -> Vec<&'static str> {
        match self {
            CleaningProfile::Standard => TRIP_COLUMNS.to_vec(),
            CleaningProfile::Strict => TRIP_COLUMNS.into_iter().chain(FARE_COLUMNS).collect(),
        }
    }
}

/// A trip row as read from disk. Any field may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrip {
    pub pickup: Option<NaiveDateTime>,
    pub dropoff: Option<NaiveDateTime>,
    pub pickup_zone: Option<i64>,
    pub dropoff_zone: Option<i64>,
    pub month: YearMonth,
    /// Only read under [`CleaningProfile::Strict`].
    pub fare: Option<RawFare>,
}

/// The fare record of a trip as read from disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFare {
    pub vendor_id: Option<i64>,
    pub passenger_count: Option<f64>,
    pub trip_distance: Option<f64>,
    pub ratecode_id: Option<i64>,
    pub store_and_fwd_flag: Option<String>,
    pub payment_type: Option<i64>,
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
    pub airport_fee: Option<f64>,
}

impl RawFare {
    /// The fare with every field present, or `None`.
    pub fn complete(&self) -> Option<Fare> {
        Some(Fare {
            vendor_id: self.vendor_id?,
            passenger_count: self.passenger_count?,
            trip_distance: self.trip_distance?,
            ratecode_id: self.ratecode_id?,
            store_and_fwd_flag: self.store_and_fwd_flag.clone()?,
            payment_type: self.payment_type?,
            fare_amount: self.fare_amount?,
            extra: self.extra?,
            mta_tax: self.mta_tax?,
            improvement_surcharge: self.improvement_surcharge?,
            tip_amount: self.tip_amount?,
            tolls_amount: self.tolls_amount?,
            total_amount: self.total_amount?,
            congestion_surcharge: self.congestion_surcharge?,
            airport_fee: self.airport_fee?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fare {
    pub vendor_id: i64,
    pub passenger_count: f64,
    pub trip_distance: f64,
    pub ratecode_id: i64,
    pub store_and_fwd_flag: String,
    pub payment_type: i64,
    pub fare_amount: f64,
    pub extra: f64,
    pub mta_tax: f64,
    pub improvement_surcharge: f64,
    pub tip_amount: f64,
    pub tolls_amount: f64,
    pub total_amount: f64,
    pub congestion_surcharge: f64,
    pub airport_fee: f64,
}

impl Fare {
    /// Whether every field holds a value the trip record dictionary allows.
    pub fn is_valid(&self) -> bool {
        let charges = [
            self.fare_amount,
            self.extra,
            self.improvement_surcharge,
            self.tip_amount,
            self.tolls_amount,
            self.total_amount,
            self.congestion_surcharge,
            self.airport_fee,
        ];

        matches!(self.vendor_id, 1 | 2)
            && self.passenger_count > 0.0
            && self.trip_distance >= MIN_TRIP_DISTANCE_MILES
            && (1..=6).contains(&self.ratecode_id)
            && matches!(self.store_and_fwd_flag.as_str(), "Y" | "N")
            && (1..=6).contains(&self.payment_type)
            && self.mta_tax == MTA_TAX
            && charges.iter().all(|c| *c >= 0.0)
    }

    /// Values of [`OUTLIER_COLUMNS`], in the same order.
    fn outlier_values(&self) -> [f64; 6] {
        [
            self.trip_distance,
            self.fare_amount,
            self.extra,
            self.tip_amount,
            self.tolls_amount,
            self.total_amount,
        ]
    }
}

/// A trip that survived cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct TripRecord {
    pub pickup: NaiveDateTime,
    pub dropoff: NaiveDateTime,
    pub pickup_zone: u32,
    pub dropoff_zone: u32,
    pub duration_minutes: f64,
    pub month: YearMonth,
}

/// Row counts after each cleaning stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanReport {
    pub initial: usize,
    pub after_nulls: usize,
    pub after_duration: usize,
    pub final_rows: usize,
}

/// Row counts of [`clean_trips_strict`]. `clean` covers the standard stages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StrictReport {
    pub clean: CleanReport,
    pub after_validation: usize,
    pub final_rows: usize,
}

/// Lists the trip files in `dir` whose embedded month lies in `start..=end`,
/// sorted by path.
pub fn trip_files_in_range(
    dir: &Path,
    start: YearMonth,
    end: YearMonth,
) -> Result<Vec<(YearMonth, PathBuf)>> {
    let mut paths = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TRIP_FILE_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !stem.starts_with(TRIP_FILE_PREFIX) {
            continue;
        }
        match YearMonth::from_file_stem(stem) {
            Some(month) if month.within(start, end) => paths.push(path),
            Some(_) => {}
            None => debug!(path = %path.display(), "No month in trip file name, skipping"),
        }
    }

    paths.sort();

    Ok(paths
        .into_iter()
        .filter_map(|p| {
            let month = YearMonth::from_file_stem(p.file_stem()?.to_str()?)?;
            Some((month, p))
        })
        .collect())
}

/// Loads the trip columns from every file in range, concatenated in file order.
pub fn load_datasets(dir: &Path, start: YearMonth, end: YearMonth) -> Result<Vec<RawTrip>> {
    load_datasets_with(dir, start, end, CleaningProfile::Standard)
}

/// Like [`load_datasets`], reading the columns `profile` needs.
#[tracing::instrument(fields(dir = %dir.display(), start = %start, end = %end))]
pub fn load_datasets_with(
    dir: &Path,
    start: YearMonth,
    end: YearMonth,
    profile: CleaningProfile,
) -> Result<Vec<RawTrip>> {
    let files = trip_files_in_range(dir, start, end)?;
    if files.is_empty() {
        bail!(
            "no {TRIP_FILE_PREFIX}*.{TRIP_FILE_EXTENSION} files between {start} and {end} in {}",
            dir.display()
        );
    }

    let mut trips = Vec::new();
    for (month, path) in files {
        let before = trips.len();
        read_trip_file(&path, month, profile, &mut trips)?;
        info!(path = %path.display(), %month, rows = trips.len() - before, "Trip file loaded");
    }

    Ok(trips)
}

/// Appends the rows of one parquet trip file to `out`.
///
/// Fails when the file lacks a column `profile` needs.
pub fn read_trip_file(
    path: &Path,
    month: YearMonth,
    profile: CleaningProfile,
    out: &mut Vec<RawTrip>,
) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata of {}", path.display()))?;

    let mut roots = Vec::new();
    for name in profile.columns() {
        let index = field_index(builder.schema(), name)
            .with_context(|| format!("{} has no {name} column", path.display()))?;
        roots.push(index);
    }
    let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
    let reader = builder.with_projection(mask).build()?;

    for batch in reader {
        let batch = batch.with_context(|| format!("decoding {}", path.display()))?;
        append_batch(&batch, month, profile, out)?;
    }

    Ok(())
}

fn append_batch(
    batch: &RecordBatch,
    month: YearMonth,
    profile: CleaningProfile,
    out: &mut Vec<RawTrip>,
) -> Result<()> {
    let timestamp_type = DataType::Timestamp(TimeUnit::Microsecond, None);

    let pickup = cast(column(batch, PICKUP_COLUMN)?, &timestamp_type)?;
    let dropoff = cast(column(batch, DROPOFF_COLUMN)?, &timestamp_type)?;
    let pickup_zone = cast(column(batch, PICKUP_ZONE_COLUMN)?, &DataType::Int64)?;
    let dropoff_zone = cast(column(batch, DROPOFF_ZONE_COLUMN)?, &DataType::Int64)?;

    let pickup = pickup.as_primitive::<TimestampMicrosecondType>();
    let dropoff = dropoff.as_primitive::<TimestampMicrosecondType>();
    let pickup_zone = pickup_zone.as_primitive::<Int64Type>();
    let dropoff_zone = dropoff_zone.as_primitive::<Int64Type>();

    let mut fares = match profile {
        CleaningProfile::Standard => None,
        CleaningProfile::Strict => Some(fare_rows(batch)?.into_iter()),
    };

    out.reserve(batch.num_rows());
    for i in 0..batch.num_rows() {
        out.push(RawTrip {
            pickup: timestamp_at(pickup, i),
            dropoff: timestamp_at(dropoff, i),
            pickup_zone: pickup_zone.is_valid(i).then(|| pickup_zone.value(i)),
            dropoff_zone: dropoff_zone.is_valid(i).then(|| dropoff_zone.value(i)),
            month,
            fare: fares.as_mut().and_then(Iterator::next),
        });
    }

    Ok(())
}

fn fare_rows(batch: &RecordBatch) -> Result<Vec<RawFare>> {
    let vendor_id = int_values(batch, "VendorID")?;
    let passenger_count = float_values(batch, "passenger_count")?;
    let trip_distance = float_values(batch, "trip_distance")?;
    let ratecode_id = int_values(batch, "RatecodeID")?;
    let store_and_fwd_flag = string_values(batch, "store_and_fwd_flag")?;
    let payment_type = int_values(batch, "payment_type")?;
    let fare_amount = float_values(batch, "fare_amount")?;
    let extra = float_values(batch, "extra")?;
    let mta_tax = float_values(batch, "mta_tax")?;
    let improvement_surcharge = float_values(batch, "improvement_surcharge")?;
    let tip_amount = float_values(batch, "tip_amount")?;
    let tolls_amount = float_values(batch, "tolls_amount")?;
    let total_amount = float_values(batch, "total_amount")?;
    let congestion_surcharge = float_values(batch, "congestion_surcharge")?;
    let airport_fee = float_values(batch, "Airport_fee")?;

    Ok((0..batch.num_rows())
        .map(|i| RawFare {
            vendor_id: vendor_id[i],
            passenger_count: passenger_count[i],
            trip_distance: trip_distance[i],
            ratecode_id: ratecode_id[i],
            store_and_fwd_flag: store_and_fwd_flag[i].clone(),
            payment_type: payment_type[i],
            fare_amount: fare_amount[i],
            extra: extra[i],
            mta_tax: mta_tax[i],
            improvement_surcharge: improvement_surcharge[i],
            tip_amount: tip_amount[i],
            tolls_amount: tolls_amount[i],
            total_amount: total_amount[i],
            congestion_surcharge: congestion_surcharge[i],
            airport_fee: airport_fee[i],
        })
        .collect())
}

fn int_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<i64>>> {
    let array = cast(column(batch, name)?, &DataType::Int64)?;
    Ok(array.as_primitive::<Int64Type>().iter().collect())
}

fn float_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>> {
    let array = cast(column(batch, name)?, &DataType::Float64)?;
    Ok(array.as_primitive::<Float64Type>().iter().collect())
}

fn string_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>> {
    let array = cast(column(batch, name)?, &DataType::Utf8)?;
    Ok(array
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

fn field_index(schema: &Schema, name: &str) -> Option<usize> {
    schema
        .fields()
        .iter()
        .position(|f| f.name().eq_ignore_ascii_case(name))
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    field_index(batch.schema_ref(), name)
        .map(|i| batch.column(i))
        .with_context(|| format!("trip file has no {name} column"))
}

fn timestamp_at(
    array: &arrow::array::PrimitiveArray<TimestampMicrosecondType>,
    i: usize,
) -> Option<NaiveDateTime> {
    if array.is_null(i) {
        return None;
    }
    DateTime::from_timestamp_micros(array.value(i)).map(|dt| dt.naive_utc())
}

/// Drops incomplete rows, derives trip duration and keeps trips lasting
/// between one minute and an hour with positive zone ids.
pub fn clean_trips(raw: Vec<RawTrip>) -> (Vec<TripRecord>, CleanReport) {
    let mut report = CleanReport::default();
    let trips = clean_stages(raw, |_| Some(()), &mut report)
        .into_iter()
        .map(|(trip, ())| trip)
        .collect();
    (trips, report)
}

/// The standard stages, then drops rows whose fare record is incomplete or
/// invalid, then trims values above the [`OUTLIER_QUANTILE`] of each of the
/// [`OUTLIER_COLUMNS`] in turn.
///
/// Expects rows loaded with [`CleaningProfile::Strict`]; rows without a fare
/// record count as incomplete.
pub fn clean_trips_strict(raw: Vec<RawTrip>) -> (Vec<TripRecord>, StrictReport) {
    let mut report = StrictReport::default();
    let rows = clean_stages(
        raw,
        |fare| fare.as_ref().and_then(RawFare::complete),
        &mut report.clean,
    );

    let valid: Vec<_> = rows.into_iter().filter(|(_, fare)| fare.is_valid()).collect();
    report.after_validation = valid.len();
    info!(rows = report.after_validation, "After validating fare records");

    let trimmed = trim_outliers(valid);
    report.final_rows = trimmed.len();
    info!(rows = report.final_rows, "After trimming outliers");

    (trimmed.into_iter().map(|(trip, _)| trip).collect(), report)
}

/// Null, duration and zone id stages. `carry` pulls whatever else a row must
/// keep out of its fare record; `None` counts the row as incomplete.
fn clean_stages<T>(
    raw: Vec<RawTrip>,
    carry: impl Fn(Option<RawFare>) -> Option<T>,
    report: &mut CleanReport,
) -> Vec<(TripRecord, T)> {
    report.initial = raw.len();
    info!(rows = report.initial, "Initial trips");

    let complete: Vec<_> = raw
        .into_iter()
        .filter_map(|r| {
            let extra = carry(r.fare)?;
            Some((r.pickup?, r.dropoff?, r.pickup_zone?, r.dropoff_zone?, r.month, extra))
        })
        .collect();
    report.after_nulls = complete.len();
    info!(rows = report.after_nulls, "After removing nulls");

    let timed: Vec<_> = complete
        .into_iter()
        .filter_map(|(pickup, dropoff, pu, du, month, extra)| {
            let minutes = (dropoff - pickup).num_milliseconds() as f64 / 60_000.0;
            (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES)
                .contains(&minutes)
                .then_some((pickup, dropoff, pu, du, month, minutes, extra))
        })
        .collect();
    report.after_duration = timed.len();
    info!(rows = report.after_duration, "After filtering duration");

    let trips: Vec<_> = timed
        .into_iter()
        .filter_map(|(pickup, dropoff, pu, du, month, duration_minutes, extra)| {
            let trip = TripRecord {
                pickup,
                dropoff,
                pickup_zone: positive_zone(pu)?,
                dropoff_zone: positive_zone(du)?,
                duration_minutes,
                month,
            };
            Some((trip, extra))
        })
        .collect();
    report.final_rows = trips.len();
    info!(rows = report.final_rows, "Final trips");

    trips
}

fn positive_zone(id: i64) -> Option<u32> {
    if id > 0 { u32::try_from(id).ok() } else { None }
}

fn trim_outliers<T>(mut rows: Vec<(T, Fare)>) -> Vec<(T, Fare)> {
    for (k, name) in OUTLIER_COLUMNS.iter().enumerate() {
        let mut values: Vec<f64> = rows.iter().map(|(_, f)| f.outlier_values()[k]).collect();
        let Some(bound) = quantile(&mut values, OUTLIER_QUANTILE) else {
            break;
        };
        rows.retain(|(_, f)| f.outlier_values()[k] <= bound);
        debug!(column = %name, bound, rows = rows.len(), "Trimmed outliers");
    }
    rows
}

/// The `q` quantile of `values` with linear interpolation between the two
/// nearest ranks. Sorts `values` in place. `None` when empty.
pub fn quantile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(values[lo] + (values[hi] - values[lo]) * (pos - lo as f64))
}
