use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::ingest::Feed;
use crate::model::{
    Agency, Coordinate, Direction, ExceptionType, LocationType, ModeFlags, Route, RouteType,
    Service, ServiceException, Shape, Stop, Timepoint, Trip, TripStop, WeekdayFlags,
};

/// Runs one conversion on the blocking pool.
async fn convert<T, F>(kind: &'static str, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        log::info!("Preparing {}.", kind);
        task()
    })
    .await
    .with_context(|| format!("Conversion of {} did not complete", kind))?
    .with_context(|| format!("Failed to read {}", kind))
}

/// Reads a GTFS folder or zip archive into typed entity maps.
///
/// Each entity kind is converted in its own task. If any of them fails, the
/// whole read fails and the other results are discarded.
pub async fn read_feed(gtfs_path: &Path) -> Result<Feed> {
    log::info!("Loading GTFS data from {:?}", gtfs_path);
    let path = gtfs_path.to_owned();
    let gtfs = tokio::task::spawn_blocking(move || gtfs_structures::RawGtfs::from_path(path))
        .await??;

    let gtfs_structures::RawGtfs {
        agencies,
        routes,
        stops,
        trips,
        stop_times,
        calendar,
        calendar_dates,
        shapes,
        ..
    } = gtfs;

    let (agencies, mut routes, stops, services, service_exceptions, shapes, trips) = tokio::try_join!(
        convert("agencies", move || Ok(convert_agencies(agencies?))),
        convert("routes", move || Ok(convert_routes(routes?))),
        convert("stops", move || Ok(convert_stops(stops?))),
        convert("calendars", move || match calendar {
            Some(calendar) => Ok(convert_calendar(calendar?)),
            None => Ok(HashMap::new()),
        }),
        convert("calendar dates", move || match calendar_dates {
            Some(calendar_dates) => Ok(convert_calendar_dates(calendar_dates?)),
            None => Ok(HashMap::new()),
        }),
        convert("shapes", move || match shapes {
            Some(shapes) => Ok(convert_shapes(shapes?)),
            None => Ok(HashMap::new()),
        }),
        convert("trips", move || Ok(convert_trips(trips?, stop_times?))),
    )?;

    // A feed with a single agency may leave route.agency_id blank.
    if let [agency] = agencies.values().collect::<Vec<_>>().as_slice() {
        for route in routes.values_mut().filter(|route| route.agency_id.is_empty()) {
            route.agency_id = agency.id.clone();
        }
    }

    Ok(Feed {
        agencies,
        routes,
        stops,
        services,
        service_exceptions,
        shapes,
        trips,
    })
}

fn convert_agencies(agencies: Vec<gtfs_structures::Agency>) -> HashMap<String, Agency> {
    agencies
        .into_iter()
        .map(|agency| {
            let id = agency.id.unwrap_or_default();
            let agency = Agency {
                id: id.clone(),
                name: agency.name,
                url: agency.url,
                timezone: agency.timezone,
            };
            (id, agency)
        })
        .collect()
}

fn convert_route_type(route_type: gtfs_structures::RouteType) -> RouteType {
    match route_type {
        gtfs_structures::RouteType::Tramway => RouteType::Tram,
        gtfs_structures::RouteType::Subway => RouteType::Subway,
        gtfs_structures::RouteType::Rail => RouteType::Rail,
        gtfs_structures::RouteType::Bus | gtfs_structures::RouteType::Coach => RouteType::Bus,
        gtfs_structures::RouteType::Ferry => RouteType::Ferry,
        gtfs_structures::RouteType::CableCar => RouteType::CableCar,
        gtfs_structures::RouteType::Gondola => RouteType::Gondola,
        gtfs_structures::RouteType::Funicular => RouteType::Funicular,
        gtfs_structures::RouteType::Air | gtfs_structures::RouteType::Taxi => {
            RouteType::Other(u8::MAX)
        }
        gtfs_structures::RouteType::Other(code) => u8::try_from(code)
            .map(RouteType::from_code)
            .unwrap_or(RouteType::Other(u8::MAX)),
    }
}

fn convert_routes(routes: Vec<gtfs_structures::Route>) -> HashMap<String, Route> {
    routes
        .into_iter()
        .map(|route| {
            let name = match route.short_name.filter(|name| !name.is_empty()) {
                Some(short_name) => short_name,
                None => route.long_name.unwrap_or_default(),
            };
            let colour = format!(
                "{:02X}{:02X}{:02X}",
                route.color.r, route.color.g, route.color.b
            );
            let route = Route {
                id: route.id,
                agency_id: route.agency_id.unwrap_or_default(),
                name,
                route_type: convert_route_type(route.route_type),
                colour,
                inbound_shape_id: None,
                outbound_shape_id: None,
                stop_ids: vec![],
            };
            (route.id.clone(), route)
        })
        .collect()
}

fn convert_stops(stops: Vec<gtfs_structures::Stop>) -> HashMap<String, Stop> {
    stops
        .into_iter()
        .map(|stop| {
            let location_type = match stop.location_type {
                gtfs_structures::LocationType::StopPoint => LocationType::Stop,
                gtfs_structures::LocationType::StopArea => LocationType::Station,
                gtfs_structures::LocationType::StationEntrance => LocationType::EntranceExit,
                gtfs_structures::LocationType::GenericNode => LocationType::GenericNode,
                gtfs_structures::LocationType::BoardingArea => LocationType::BoardingArea,
                gtfs_structures::LocationType::Unknown(_) => LocationType::Unknown,
            };
            // Nodes and boarding areas may omit their position.
            let location = Coordinate::new(
                stop.latitude.unwrap_or_default(),
                stop.longitude.unwrap_or_default(),
            );
            let stop = Stop {
                id: stop.id,
                code: stop.code.unwrap_or_default(),
                name: stop.name.unwrap_or_default(),
                parent_id: stop.parent_station.filter(|id| !id.is_empty()),
                location,
                location_type,
                supported_modes: ModeFlags::NONE,
            };
            (stop.id.clone(), stop)
        })
        .collect()
}

fn convert_calendar(calendar: Vec<gtfs_structures::Calendar>) -> HashMap<String, Service> {
    calendar
        .into_iter()
        .map(|calendar| {
            let service = Service {
                id: calendar.id,
                weekdays: WeekdayFlags::from_bools([
                    calendar.monday,
                    calendar.tuesday,
                    calendar.wednesday,
                    calendar.thursday,
                    calendar.friday,
                    calendar.saturday,
                    calendar.sunday,
                ]),
                start_date: calendar.start_date,
                end_date: calendar.end_date,
            };
            (service.id.clone(), service)
        })
        .collect()
}

fn convert_calendar_dates(
    calendar_dates: Vec<gtfs_structures::CalendarDate>,
) -> HashMap<String, ServiceException> {
    calendar_dates
        .into_iter()
        .map(|calendar_date| {
            let exception = ServiceException {
                service_id: calendar_date.service_id,
                date: calendar_date.date,
                exception_type: match calendar_date.exception_type {
                    gtfs_structures::Exception::Added => ExceptionType::Added,
                    gtfs_structures::Exception::Deleted => ExceptionType::Removed,
                },
            };
            (exception.key(), exception)
        })
        .collect()
}

fn convert_shapes(points: Vec<gtfs_structures::Shape>) -> HashMap<String, Shape> {
    let mut points_by_shape: HashMap<String, Vec<gtfs_structures::Shape>> = HashMap::new();
    for point in points {
        points_by_shape.entry(point.id.clone()).or_default().push(point);
    }
    points_by_shape
        .into_iter()
        .map(|(id, mut points)| {
            points.sort_by_key(|point| point.sequence);
            let coordinates = points
                .iter()
                .map(|point| Coordinate::new(point.latitude, point.longitude))
                .collect();
            (id.clone(), Shape { id, coordinates })
        })
        .collect()
}

fn convert_trips(
    raw_trips: Vec<gtfs_structures::RawTrip>,
    stop_times: Vec<gtfs_structures::RawStopTime>,
) -> HashMap<String, Trip> {
    let mut stop_times_by_trip: HashMap<String, Vec<gtfs_structures::RawStopTime>> =
        HashMap::new();
    for stop_time in stop_times {
        stop_times_by_trip
            .entry(stop_time.trip_id.clone())
            .or_default()
            .push(stop_time);
    }

    raw_trips
        .into_iter()
        .map(|trip| {
            let mut stop_times = stop_times_by_trip.remove(&trip.id).unwrap_or_default();
            stop_times.sort_by_key(|stop_time| stop_time.stop_sequence);

            // Untimed stops take the time of the stop before them.
            let mut previous_time = 0;
            let stops = stop_times
                .into_iter()
                .map(|stop_time| {
                    let arrival_time = stop_time
                        .arrival_time
                        .or(stop_time.departure_time)
                        .unwrap_or(previous_time);
                    let departure_time = stop_time.departure_time.unwrap_or(arrival_time);
                    previous_time = departure_time;
                    TripStop {
                        stop_id: stop_time.stop_id,
                        arrival_time,
                        departure_time,
                        timepoint: match stop_time.timepoint {
                            gtfs_structures::TimepointType::Approximate => Timepoint::Approximate,
                            gtfs_structures::TimepointType::Exact => Timepoint::Exact,
                        },
                    }
                })
                .collect();

            let trip = Trip {
                id: trip.id,
                route_id: trip.route_id,
                service_id: trip.service_id,
                shape_id: trip.shape_id.unwrap_or_default(),
                direction: match trip.direction_id {
                    Some(gtfs_structures::DirectionType::Inbound) => Direction::Inbound,
                    Some(gtfs_structures::DirectionType::Outbound) | None => Direction::Outbound,
                },
                headsign: trip.trip_headsign.unwrap_or_default(),
                stops,
            };
            (trip.id.clone(), trip)
        })
        .collect()
}
