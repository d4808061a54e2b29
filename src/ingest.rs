use std::collections::{BTreeMap, HashMap, HashSet};

use chrono_tz::Tz;
use indicatif::ProgressIterator;

use crate::collection::Collection;
use crate::error::{Result, StoreError};
use crate::model::{
    Agency, Direction, Key, ModeFlags, Route, Service, ServiceException, Shape, Stop, Trip,
};
use crate::records::KeyList;
use crate::store::Store;

/// Parsed entity maps, keyed by entity id. Service exceptions are keyed by
/// [`ServiceException::key`].
#[derive(Debug, Default)]
pub struct Feed {
    pub agencies: HashMap<Key, Agency>,
    pub routes: HashMap<Key, Route>,
    pub stops: HashMap<Key, Stop>,
    pub services: HashMap<Key, Service>,
    pub service_exceptions: HashMap<Key, ServiceException>,
    pub shapes: HashMap<Key, Shape>,
    pub trips: HashMap<Key, Trip>,
}

fn progress_style() -> indicatif::ProgressStyle {
    indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
    )
    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
}

/// Shape used by most trips in `trips`. Ties go to the lowest shape id.
/// Trips without a shape count towards the empty id, which selects no shape.
pub fn representative_shape<'a>(trips: impl IntoIterator<Item = &'a Trip>) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for trip in trips {
        *counts.entry(trip.shape_id.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(shape_id, _)| shape_id)
}

/// Derived attributes of one route.
#[derive(Debug, Default, PartialEq)]
pub struct RouteSummary {
    pub outbound_shape_id: Option<Key>,
    pub inbound_shape_id: Option<Key>,
    pub stop_ids: Vec<Key>,
}

/// Picks each direction's representative shape and collects the stops of the
/// trips following it: outbound first, trips in id order, each stop once.
pub fn summarize_route(trips: &[&Trip]) -> RouteSummary {
    let mut trips = trips.to_vec();
    trips.sort_by(|a, b| a.id.cmp(&b.id));

    let mut summary = RouteSummary::default();
    let mut seen = HashSet::new();
    for direction in [Direction::Outbound, Direction::Inbound] {
        let in_direction: Vec<&Trip> = trips
            .iter()
            .copied()
            .filter(|trip| trip.direction == direction)
            .collect();
        let Some(shape_id) = representative_shape(in_direction.iter().copied()) else {
            continue;
        };
        for trip in in_direction.iter().filter(|trip| trip.shape_id == shape_id) {
            for stop in &trip.stops {
                if seen.insert(stop.stop_id.as_str()) {
                    summary.stop_ids.push(stop.stop_id.clone());
                }
            }
        }
        let shape_id = (!shape_id.is_empty()).then(|| shape_id.to_owned());
        match direction {
            Direction::Outbound => summary.outbound_shape_id = shape_id,
            Direction::Inbound => summary.inbound_shape_id = shape_id,
        }
    }
    summary
}

fn validate_timezones(agencies: &HashMap<Key, Agency>) -> Result<()> {
    for agency in agencies.values() {
        if agency.timezone.parse::<Tz>().is_err() {
            return Err(StoreError::UnknownTimezone {
                agency: agency.id.clone(),
                timezone: agency.timezone.clone(),
            });
        }
    }
    Ok(())
}

fn push_index(index: &mut BTreeMap<Key, Vec<Key>>, key: &str, id: &str) {
    if !key.is_empty() {
        index.entry(key.to_owned()).or_default().push(id.to_owned());
    }
}

fn put_index(collection: &mut Collection<KeyList>, index: BTreeMap<Key, Vec<Key>>) -> Result<()> {
    for (key, mut ids) in index {
        ids.sort();
        collection.put(&key, &KeyList(ids))?;
    }
    Ok(())
}

/// Computes derived route attributes and populates a fresh in-memory store.
/// Nothing is returned unless every step succeeds.
pub fn build_store(mut feed: Feed) -> Result<Store> {
    let style = progress_style();

    validate_timezones(&feed.agencies)?;

    let before = feed.trips.len();
    feed.trips.retain(|id, trip| {
        if trip.stops.is_empty() {
            log::debug!("Dropping trip {:?} without stop times", id);
            false
        } else {
            true
        }
    });
    if feed.trips.len() != before {
        log::warn!("Dropped {} trips without stop times", before - feed.trips.len());
    }

    let mut trips_by_route: HashMap<&str, Vec<&Trip>> = HashMap::new();
    for trip in feed
        .trips
        .values()
        .progress_with_style(style.clone())
        .with_message("Group trips by route.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        trips_by_route
            .entry(trip.route_id.as_str())
            .or_default()
            .push(trip);
    }

    let mut summaries = HashMap::new();
    let mut inherited_modes: HashMap<Key, ModeFlags> = HashMap::new();
    for route in feed
        .routes
        .values()
        .progress_with_style(style.clone())
        .with_message("Find route shapes and stops.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        let trips = trips_by_route
            .get(route.id.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mode = route.route_type.mode();
        for trip in trips {
            for stop in &trip.stops {
                inherited_modes
                    .entry(stop.stop_id.clone())
                    .or_default()
                    .insert(mode);
            }
        }
        summaries.insert(route.id.clone(), summarize_route(trips));
    }
    drop(trips_by_route);

    for (id, summary) in summaries {
        if let Some(route) = feed.routes.get_mut(&id) {
            route.outbound_shape_id = summary.outbound_shape_id;
            route.inbound_shape_id = summary.inbound_shape_id;
            route.stop_ids = summary.stop_ids;
        }
    }
    for stop in feed.stops.values_mut() {
        if stop.supported_modes.is_empty() {
            if let Some(modes) = inherited_modes.get(&stop.id) {
                stop.supported_modes = *modes;
            }
        }
    }

    let mut store = Store::new();
    let max_shape_length = feed
        .shapes
        .values()
        .map(|shape| shape.coordinates.len())
        .max()
        .unwrap_or(0);
    store.set_max_shape_length(u32::try_from(max_shape_length).unwrap_or(u32::MAX));

    log::info!("Storing {} agencies.", feed.agencies.len());
    for agency in feed.agencies.values() {
        store.agencies.put(&agency.id, agency)?;
    }

    let mut routes_by_name = BTreeMap::new();
    for route in feed
        .routes
        .values()
        .progress_with_style(style.clone())
        .with_message("Store routes.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        store.routes.put(&route.id, route)?;
        push_index(&mut routes_by_name, &route.name, &route.id);
    }

    let mut stops_by_name = BTreeMap::new();
    let mut stops_by_parent = BTreeMap::new();
    for stop in feed
        .stops
        .values()
        .progress_with_style(style.clone())
        .with_message("Store stops.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        store.stops.put(&stop.id, stop)?;
        push_index(&mut stops_by_name, &stop.name, &stop.id);
        if let Some(parent_id) = &stop.parent_id {
            push_index(&mut stops_by_parent, parent_id, &stop.id);
        }
    }

    let mut trips_by_route = BTreeMap::new();
    for trip in feed
        .trips
        .values()
        .progress_with_style(style.clone())
        .with_message("Store trips.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        store.trips.put(&trip.id, trip)?;
        push_index(&mut trips_by_route, &trip.route_id, &trip.id);
    }

    log::info!(
        "Storing {} services and {} service exceptions.",
        feed.services.len(),
        feed.service_exceptions.len()
    );
    for service in feed.services.values() {
        store.services.put(&service.id, service)?;
    }
    for exception in feed.service_exceptions.values() {
        store.service_exceptions.put(&exception.key(), exception)?;
    }

    for shape in feed
        .shapes
        .values()
        .progress_with_style(style)
        .with_message("Store shapes.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        store.shapes.put(&shape.id, shape)?;
    }

    log::info!("Building indexes.");
    put_index(&mut store.routes_by_name, routes_by_name)?;
    put_index(&mut store.stops_by_name, stops_by_name)?;
    put_index(&mut store.stops_by_parent, stops_by_parent)?;
    put_index(&mut store.trips_by_route, trips_by_route)?;

    Ok(store)
}
