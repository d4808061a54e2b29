use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::model::{LocationType, Stop};
use crate::store::Store;

#[derive(Debug, Clone, serde::Serialize)]
struct StationLocations {
    stations: Vec<StationInfo>,
}

#[derive(Debug, Clone, serde::Serialize)]
struct StationInfo {
    id: String,
    name: String,
    latitude: f64,
    longitude: f64,
    platforms: usize,
}

/// Top-level stops: stations, and stops that are not part of a station.
fn is_station(stop: &Stop) -> bool {
    stop.location_type == LocationType::Station
        || (stop.location_type == LocationType::Stop && stop.parent_id.is_none())
}

fn collect_stations(store: &Store, name_filter: Option<&str>) -> Result<StationLocations> {
    let mut stops = store.stops.scan_where(|stop| {
        is_station(stop) && name_filter.map_or(true, |filter| stop.name.contains(filter))
    })?;
    stops.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

    let mut result = StationLocations { stations: vec![] };
    for stop in stops {
        let platforms = store.get_stops_by_parent_id(&stop.id)?.len();
        result.stations.push(StationInfo {
            id: stop.id,
            name: stop.name,
            latitude: stop.location.latitude,
            longitude: stop.location.longitude,
            platforms,
        });
    }
    Ok(result)
}

/// Writes the stations whose name contains `name_filter` as pretty JSON.
pub fn export_station_locations(
    store: &Store,
    name_filter: Option<&str>,
    output_path: &Path,
) -> Result<usize> {
    let result = collect_stations(store, name_filter)?;
    let mut file = std::fs::File::create(output_path)?;
    file.write_all(serde_json::to_string_pretty(&result)?.as_bytes())?;
    log::info!(
        "Exported {} stations to {:?}",
        result.stations.len(),
        output_path
    );
    Ok(result.stations.len())
}
