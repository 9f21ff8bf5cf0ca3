//! CLI entry point for the taxi flow mapper.
//!
//! Provides subcommands for the pickup heatmap, the transit line map, the
//! combined overlay and the top taxi routes map. Each writes a standalone
//! HTML map to the output directory.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use taxi_flow_mapper::config::DatasetConfig;
use taxi_flow_mapper::figure::{self, MapView};
use taxi_flow_mapper::flows::{flow_paths, top_routes};
use taxi_flow_mapper::heatmap::{ZoneCount, pickup_counts};
use taxi_flow_mapper::month::YearMonth;
use taxi_flow_mapper::output::{flow_rows, log_top_routes, write_csv};
use taxi_flow_mapper::transit::{FeedKind, RouteShape, build_bus_shapes, build_feed_shapes};
use taxi_flow_mapper::trips::{
    CleaningProfile, TripRecord, clean_trips, clean_trips_strict, load_datasets_with,
};
use taxi_flow_mapper::zones::ZoneTable;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "taxi_flow_mapper")]
#[command(about = "Maps taxi pickup density, transit lines and top taxi routes", long_about = None)]
struct Cli {
    /// JSON dataset config; built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// First trip month to load (YYYY-MM)
    #[arg(long, global = true)]
    start: Option<YearMonth>,

    /// Last trip month to load (YYYY-MM)
    #[arg(long, global = true)]
    end: Option<YearMonth>,

    /// Directory the HTML maps are written to
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Also export the aggregated tables as CSV
    #[arg(long, global = true, default_value_t = false)]
    export_csv: bool,

    /// Validate fare records and trim outliers on top of the standard cleaning
    #[arg(long, global = true, default_value_t = false)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Choropleth of taxi pickups per zone
    Heatmap,
    /// Subway and bus route lines, together and per feed
    Transit,
    /// Pickup heatmap with subway and bus lines over it
    Overlay,
    /// Most frequent origin-destination routes as curved arrows
    TopRoutes {
        /// Number of routes to rank
        #[arg(short = 'n', long)]
        top_n: Option<usize>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/taxi_flow_mapper.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("taxi_flow_mapper.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = DatasetConfig::load_or_default(cli.config.as_deref())?;
    if let Some(start) = cli.start {
        config.start = start;
    }
    if let Some(end) = cli.end {
        config.end = end;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    if cli.strict {
        config.strict_cleaning = true;
    }

    match cli.command {
        Commands::Heatmap => run_heatmap(&config, cli.export_csv)?,
        Commands::Transit => run_transit(&config)?,
        Commands::Overlay => run_overlay(&config, cli.export_csv)?,
        Commands::TopRoutes { top_n } => {
            if let Some(n) = top_n {
                config.top_n = n;
            }
            run_top_routes(&config, cli.export_csv)?;
        }
    }

    Ok(())
}

/// Loads every trip file in the configured window and cleans the result.
fn load_clean_trips(config: &DatasetConfig) -> Result<Vec<TripRecord>> {
    if !config.strict_cleaning {
        let raw = load_datasets_with(
            &config.taxi_dir,
            config.start,
            config.end,
            CleaningProfile::Standard,
        )?;
        let (trips, report) = clean_trips(raw);
        info!(
            initial = report.initial,
            kept = report.final_rows,
            "Trip cleaning complete"
        );
        return Ok(trips);
    }

    let raw = load_datasets_with(
        &config.taxi_dir,
        config.start,
        config.end,
        CleaningProfile::Strict,
    )?;
    let (trips, report) = clean_trips_strict(raw);
    info!(
        initial = report.clean.initial,
        valid = report.after_validation,
        kept = report.final_rows,
        "Strict trip cleaning complete"
    );
    Ok(trips)
}

fn load_pickup_counts(config: &DatasetConfig, export_csv: bool) -> Result<Vec<ZoneCount>> {
    let trips = load_clean_trips(config)?;
    let counts = pickup_counts(&trips);
    info!(zones = counts.len(), "Pickup counts aggregated");

    if export_csv {
        write_csv(&config.output_path("pickup_counts.csv"), &counts)?;
    }
    Ok(counts)
}

fn load_transit(config: &DatasetConfig) -> Result<(Vec<RouteShape>, Vec<RouteShape>)> {
    let subway = build_feed_shapes(&config.subway_dir, &config.route_color_fallback)?;
    let bus = build_bus_shapes(
        &config.bus_dir,
        &config.bus_subdirs,
        &config.route_color_fallback,
    )?;
    Ok((subway, bus))
}

#[tracing::instrument(skip_all)]
fn run_heatmap(config: &DatasetConfig, export_csv: bool) -> Result<()> {
    let counts = load_pickup_counts(config, export_csv)?;
    let zones = ZoneTable::load(&config.zones_file)?;

    let fig = figure::pickup_heatmap(&counts, &zones, MapView::CITY)?;
    fig.write_html(&config.output_path("pickup_heatmap.html"), "Taxi Pickups")
}

#[tracing::instrument(skip_all)]
fn run_transit(config: &DatasetConfig) -> Result<()> {
    let (subway, bus) = load_transit(config)?;
    info!(subway = subway.len(), bus = bus.len(), "Transit shapes loaded");

    figure::feed_map(&subway, FeedKind::Subway, MapView::CITY)
        .write_html(&config.output_path("subway_routes.html"), "Subway Routes")?;
    figure::feed_map(&bus, FeedKind::Bus, MapView::CITY)
        .write_html(&config.output_path("bus_routes.html"), "Bus Routes")?;

    let fig = figure::transit_map(&subway, &bus, MapView::CITY);
    fig.write_html(&config.output_path("transit_routes.html"), "Transit Routes")
}

#[tracing::instrument(skip_all)]
fn run_overlay(config: &DatasetConfig, export_csv: bool) -> Result<()> {
    let counts = load_pickup_counts(config, export_csv)?;
    let zones = ZoneTable::load(&config.zones_file)?;
    let (subway, bus) = load_transit(config)?;

    let fig = figure::combined_map(&counts, &zones, &subway, &bus, MapView::MIDTOWN)?;
    fig.write_html(
        &config.output_path("pickups_with_transit.html"),
        "Taxi Pickups and Transit",
    )
}

#[tracing::instrument(skip_all, fields(top_n = config.top_n))]
fn run_top_routes(config: &DatasetConfig, export_csv: bool) -> Result<()> {
    let trips = load_clean_trips(config)?;
    let zones = ZoneTable::load(&config.zones_file)?;

    let flows = top_routes(&trips, &zones, config.top_n);
    log_top_routes(&flows, trips.len());

    if export_csv {
        write_csv(
            &config.output_path("top_routes.csv"),
            &flow_rows(&flows, trips.len()),
        )?;
    }

    let paths = flow_paths(&flows);
    let fig = figure::top_routes_map(&flows, &paths, &zones, MapView::ROUTES)?;
    fig.write_html(&config.output_path("top_routes.html"), "Top Taxi Routes")
}
