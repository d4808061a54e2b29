use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use clap::{Parser, Subcommand};

use gtfs_store::{export_stations, gtfs_source, ingest, Store};

/// Build and query read-optimized GTFS stores
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show debug messages
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Build a store from a GTFS folder or zip archive
    Prepare {
        gtfs_path: PathBuf,
        /// Container file to write
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print metadata and collection sizes of a store
    Info { db: PathBuf },
    /// List trips operating around an instant
    CurrentTrips {
        db: PathBuf,
        /// Only consider trips of this route id
        #[arg(long, conflicts_with = "route_name")]
        route: Option<String>,
        /// Only consider trips of the route with this name
        #[arg(long)]
        route_name: Option<String>,
        #[arg(long, default_value_t = 0)]
        buffer_minutes: i64,
        /// RFC 3339 instant, defaults to now
        #[arg(long)]
        at: Option<DateTime<FixedOffset>>,
    },
    /// Export station locations as JSON
    ExportStations {
        db: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Only export stations whose name contains this text
        #[arg(long)]
        name_filter: Option<String>,
    },
}

fn format_seconds(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 3600, seconds % 3600 / 60)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .with_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init()?;

    match cli.command {
        Command::Prepare { gtfs_path, output } => {
            let feed = gtfs_source::read_feed(&gtfs_path).await?;
            let mut store = ingest::build_store(feed)?;
            store.save_to(&output)?;
            store.close();
        }
        Command::Info { db } => {
            let store = Store::load(&db)?;
            let created = DateTime::<Utc>::from_timestamp(store.created(), 0)
                .context("Invalid creation timestamp")?;
            println!("version: {}", store.version());
            println!("created: {}", created.to_rfc3339());
            println!("max shape length: {}", store.max_shape_length());
            for (name, len) in store.collection_sizes() {
                println!("{name}: {len}");
            }
            store.close();
        }
        Command::CurrentTrips {
            db,
            route,
            route_name,
            buffer_minutes,
            at,
        } => {
            let store = Store::load(&db)?;
            let trips = match (route, route_name) {
                (Some(route_id), _) => store.get_trips_by_route_id(&route_id)?,
                (None, Some(name)) => {
                    let route = store.get_route_by_name(&name)?;
                    store.get_trips_by_route_id(&route.id)?
                }
                (None, None) => store.get_all_trips()?,
            };
            let at = at.map_or_else(Utc::now, |at| at.with_timezone(&Utc));
            let buffer = TimeDelta::try_minutes(buffer_minutes)
                .context("Buffer is out of range")?;
            let mut current = store.get_current_trips_with_buffer(at, buffer, trips)?;
            current.sort_by_key(|trip| (trip.start_time(), trip.id.clone()));
            for trip in &current {
                println!(
                    "{} {}-{} {} {}",
                    trip.id,
                    format_seconds(trip.start_time()),
                    format_seconds(trip.end_time()),
                    trip.route_id,
                    trip.headsign
                );
            }
            log::info!("{} trips operating", current.len());
            store.close();
        }
        Command::ExportStations {
            db,
            output,
            name_filter,
        } => {
            let store = Store::load(&db)?;
            export_stations::export_station_locations(&store, name_filter.as_deref(), &output)?;
            store.close();
        }
    }
    Ok(())
}
