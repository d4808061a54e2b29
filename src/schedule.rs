//! Which trips are operating around a given instant.
//!
//! Trip times are seconds since midnight of the trip's service day and may
//! run past 24:00. The query instant is converted to the agency's local time
//! and compared against each trip on the service days before, on and after
//! the query date, so a trip that started late yesterday is still found
//! after midnight.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::error::{Result, StoreError};
use crate::model::{Agency, ExceptionType, Key, Route, Service, ServiceException, Trip};

pub use crate::model::SECONDS_IN_DAY;

/// Lookups the scheduling engine needs.
pub trait ScheduleSource {
    fn route(&self, route_id: &str) -> Result<Route>;

    fn agency(&self, agency_id: &str) -> Result<Agency>;

    fn service(&self, service_id: &str) -> Result<Service>;

    fn service_exception(
        &self,
        service_id: &str,
        date: NaiveDate,
    ) -> Result<Option<ServiceException>>;
}

/// Whether a service runs on `date`, given the exception recorded for that
/// date if there is one. Exceptions take precedence over the weekly pattern
/// and the validity range.
pub fn service_runs_on(
    service: &Service,
    exception: Option<&ServiceException>,
    date: NaiveDate,
) -> bool {
    match exception.map(|exception| exception.exception_type) {
        Some(ExceptionType::Removed) => false,
        Some(ExceptionType::Added) => true,
        None => service.covers(date) && service.weekdays.contains(date.weekday()),
    }
}

pub fn is_service_running<S: ScheduleSource + ?Sized>(
    source: &S,
    service_id: &str,
    date: NaiveDate,
) -> Result<bool> {
    let service = source.service(service_id)?;
    let exception = source.service_exception(service_id, date)?;
    Ok(service_runs_on(&service, exception.as_ref(), date))
}

/// Resolves the timezone of the agency operating `trip`.
pub fn trip_timezone<S: ScheduleSource + ?Sized>(source: &S, trip: &Trip) -> Result<Tz> {
    let route = source.route(&trip.route_id)?;
    let agency = source.agency(&route.agency_id)?;
    agency
        .timezone
        .parse::<Tz>()
        .map_err(|_| StoreError::UnknownTimezone {
            agency: agency.id.clone(),
            timezone: agency.timezone.clone(),
        })
}

/// Per-call memo of service lookups.
struct ServiceDays<'s, S: ScheduleSource + ?Sized> {
    source: &'s S,
    services: HashMap<Key, Service>,
    running: HashMap<(Key, NaiveDate), bool>,
}

impl<'s, S: ScheduleSource + ?Sized> ServiceDays<'s, S> {
    fn new(source: &'s S) -> Self {
        ServiceDays {
            source,
            services: HashMap::new(),
            running: HashMap::new(),
        }
    }

    fn service(&mut self, service_id: &str) -> Result<&Service> {
        if !self.services.contains_key(service_id) {
            let service = self.source.service(service_id)?;
            self.services.insert(service_id.to_owned(), service);
        }
        self.services
            .get(service_id)
            .ok_or_else(|| StoreError::not_found("service", service_id))
    }

    fn is_running(&mut self, service_id: &str, day: NaiveDate) -> Result<bool> {
        let cache_key = (service_id.to_owned(), day);
        if let Some(&running) = self.running.get(&cache_key) {
            return Ok(running);
        }
        let exception = self.source.service_exception(service_id, day)?;
        let running = service_runs_on(self.service(service_id)?, exception.as_ref(), day);
        self.running.insert(cache_key, running);
        Ok(running)
    }
}

/// Trip interval in seconds relative to its own service-day midnight.
fn trip_window(trip: &Trip) -> (i64, i64) {
    let start = i64::from(trip.start_time());
    let mut end = i64::from(trip.end_time());
    if end < start {
        end += SECONDS_IN_DAY;
    }
    (start, end)
}

/// Returns the trips operating within `buffer` of `at`, in input order.
///
/// The timezone is taken from the first trip's agency; every trip is assumed
/// to share it. An empty input returns immediately without any lookups.
pub fn current_trips_with_buffer<S, Z>(
    source: &S,
    at: DateTime<Z>,
    buffer: TimeDelta,
    trips: Vec<Trip>,
) -> Result<Vec<Trip>>
where
    S: ScheduleSource + ?Sized,
    Z: TimeZone,
{
    if buffer < TimeDelta::zero() {
        return Err(StoreError::InvalidTimeRange(format!(
            "negative buffer of {} seconds",
            buffer.num_seconds()
        )));
    }
    let Some(first) = trips.first() else {
        return Ok(vec![]);
    };

    let timezone = trip_timezone(source, first)?;
    let local = at.with_timezone(&timezone);
    let query_seconds = i64::from(local.num_seconds_from_midnight());
    let query_date = local.date_naive();
    let buffer_seconds = buffer.num_seconds();
    let (query_start, query_end) = (query_seconds - buffer_seconds, query_seconds + buffer_seconds);
    log::debug!(
        "Checking {} trips at {} {} (+/- {}s)",
        trips.len(),
        query_date,
        query_seconds,
        buffer_seconds
    );

    let mut service_days = ServiceDays::new(source);
    let mut current = vec![];
    for trip in trips {
        // Every candidate must reference a known service, overlapping or not.
        service_days.service(&trip.service_id)?;
        let (start, end) = trip_window(&trip);
        let mut operating = false;
        for offset in -1..=1i64 {
            let shifted_start = start + offset * SECONDS_IN_DAY;
            let shifted_end = end + offset * SECONDS_IN_DAY;
            if shifted_start > query_end || shifted_end < query_start {
                continue;
            }
            let Some(service_day) = query_date.checked_add_signed(TimeDelta::days(offset)) else {
                continue;
            };
            if service_days.is_running(&trip.service_id, service_day)? {
                operating = true;
                break;
            }
        }
        if operating {
            current.push(trip);
        }
    }
    Ok(current)
}

pub fn current_trips_at<S, Z>(source: &S, at: DateTime<Z>, trips: Vec<Trip>) -> Result<Vec<Trip>>
where
    S: ScheduleSource + ?Sized,
    Z: TimeZone,
{
    current_trips_with_buffer(source, at, TimeDelta::zero(), trips)
}

/// Trips operating at any point in `[start, end]`.
pub fn current_trips_between<S, Z>(
    source: &S,
    start: DateTime<Z>,
    end: DateTime<Z>,
    trips: Vec<Trip>,
) -> Result<Vec<Trip>>
where
    S: ScheduleSource + ?Sized,
    Z: TimeZone,
{
    if end < start {
        return Err(StoreError::InvalidTimeRange(format!(
            "end {end:?} is before start {start:?}"
        )));
    }
    let half_width = (end.clone() - start.clone()) / 2;
    current_trips_with_buffer(source, start + half_width, half_width, trips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, RouteType, Timepoint, TripStop, WeekdayFlags};
    use chrono::Utc;
    use std::cell::Cell;

    const PERTH: &str = "Australia/Perth";

    #[derive(Default)]
    struct FakeSource {
        services: HashMap<Key, Service>,
        exceptions: HashMap<Key, ServiceException>,
        timezone: Option<String>,
        lookups: Cell<usize>,
    }

    impl FakeSource {
        fn new() -> Self {
            let mut source = FakeSource {
                timezone: Some(PERTH.into()),
                ..FakeSource::default()
            };
            source.services.insert("mon".into(), monday_service());
            source
        }

        fn with_exception(mut self, date: NaiveDate, exception_type: ExceptionType) -> Self {
            let exception = ServiceException {
                service_id: "mon".into(),
                date,
                exception_type,
            };
            self.exceptions.insert(exception.key(), exception);
            self
        }

        fn count(&self) {
            self.lookups.set(self.lookups.get() + 1);
        }
    }

    impl ScheduleSource for FakeSource {
        fn route(&self, route_id: &str) -> Result<Route> {
            self.count();
            Ok(Route {
                id: route_id.into(),
                agency_id: "transperth".into(),
                name: "Yanchep Line".into(),
                route_type: RouteType::Rail,
                colour: "".into(),
                inbound_shape_id: None,
                outbound_shape_id: None,
                stop_ids: vec![],
            })
        }

        fn agency(&self, agency_id: &str) -> Result<Agency> {
            self.count();
            Ok(Agency {
                id: agency_id.into(),
                name: "Transperth".into(),
                url: "".into(),
                timezone: self.timezone.clone().unwrap_or_default(),
            })
        }

        fn service(&self, service_id: &str) -> Result<Service> {
            self.count();
            self.services
                .get(service_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("service", service_id))
        }

        fn service_exception(
            &self,
            service_id: &str,
            date: NaiveDate,
        ) -> Result<Option<ServiceException>> {
            self.count();
            Ok(self
                .exceptions
                .get(&crate::model::service_exception_key(service_id, date))
                .cloned())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monday_service() -> Service {
        Service {
            id: "mon".into(),
            weekdays: WeekdayFlags::MONDAY,
            start_date: date(2025, 1, 1),
            end_date: date(2025, 12, 31),
        }
    }

    fn trip(id: &str, service_id: &str, start: u32, end: u32) -> Trip {
        let stop = |stop_id: &str, time: u32| TripStop {
            stop_id: stop_id.into(),
            arrival_time: time,
            departure_time: time,
            timepoint: Timepoint::Exact,
        };
        Trip {
            id: id.into(),
            route_id: "yanchep".into(),
            service_id: service_id.into(),
            shape_id: "".into(),
            direction: Direction::Outbound,
            headsign: "".into(),
            stops: vec![stop("a", start), stop("b", end)],
        }
    }

    /// `hh:mm` local Perth time (UTC+8, no DST) on `day`.
    fn perth(day: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
        day.and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_local_timezone(chrono_tz::Australia::Perth)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn ids(trips: &[Trip]) -> Vec<&str> {
        trips.iter().map(|trip| trip.id.as_str()).collect()
    }

    #[test]
    fn weekly_pattern_and_date_range() {
        let source = FakeSource::new();
        // 2025-06-02 is a Monday.
        assert!(is_service_running(&source, "mon", date(2025, 6, 2)).unwrap());
        assert!(!is_service_running(&source, "mon", date(2025, 6, 3)).unwrap());
        assert!(!is_service_running(&source, "mon", date(2026, 6, 1)).unwrap());
        assert!(!is_service_running(&source, "mon", date(2024, 12, 30)).unwrap());
    }

    #[test]
    fn exceptions_override_the_weekly_pattern() {
        let source = FakeSource::new()
            .with_exception(date(2025, 6, 3), ExceptionType::Added)
            .with_exception(date(2025, 6, 9), ExceptionType::Removed);
        assert!(is_service_running(&source, "mon", date(2025, 6, 3)).unwrap());
        assert!(!is_service_running(&source, "mon", date(2025, 6, 9)).unwrap());
        assert!(is_service_running(&source, "mon", date(2025, 6, 16)).unwrap());
    }

    #[test]
    fn trips_within_their_window() {
        let source = FakeSource::new();
        let trips = vec![
            trip("morning", "mon", 8 * 3600, 9 * 3600),
            trip("evening", "mon", 18 * 3600, 19 * 3600),
        ];
        let current = current_trips_at(&source, perth(date(2025, 6, 2), 8, 30), trips).unwrap();
        assert_eq!(ids(&current), vec!["morning"]);
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        let source = FakeSource::new();
        let trips = vec![trip("t", "mon", 8 * 3600, 9 * 3600)];
        let at_end = perth(date(2025, 6, 2), 9, 0);
        assert_eq!(current_trips_at(&source, at_end, trips.clone()).unwrap().len(), 1);
        let after = perth(date(2025, 6, 2), 9, 1);
        assert!(current_trips_at(&source, after, trips.clone()).unwrap().is_empty());
        let buffered =
            current_trips_with_buffer(&source, after, TimeDelta::minutes(1), trips).unwrap();
        assert_eq!(buffered.len(), 1);
    }

    #[test]
    fn trip_not_running_on_query_day() {
        let source = FakeSource::new();
        let trips = vec![trip("t", "mon", 8 * 3600, 9 * 3600)];
        let tuesday = perth(date(2025, 6, 3), 8, 30);
        assert!(current_trips_at(&source, tuesday, trips).unwrap().is_empty());
    }

    #[test]
    fn midnight_crossing_trip_belongs_to_previous_service_day() {
        let source = FakeSource::new();
        let trips = vec![trip("late", "mon", 85_800, 86_700)];
        let tuesday_after_midnight = perth(date(2025, 6, 3), 0, 2);
        let current = current_trips_at(&source, tuesday_after_midnight, trips).unwrap();
        assert_eq!(ids(&current), vec!["late"]);
    }

    #[test]
    fn midnight_crossing_trip_is_not_found_the_night_after() {
        let source = FakeSource::new();
        let trips = vec![trip("late", "mon", 85_800, 86_700)];
        // Early Monday belongs to Sunday's service day.
        let monday_after_midnight = perth(date(2025, 6, 2), 0, 2);
        assert!(current_trips_at(&source, monday_after_midnight, trips)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn wrapped_end_time_is_treated_as_next_day() {
        let source = FakeSource::new();
        let trips = vec![trip("wrapped", "mon", 85_800, 300)];
        let current = current_trips_at(&source, perth(date(2025, 6, 3), 0, 2), trips).unwrap();
        assert_eq!(ids(&current), vec!["wrapped"]);
    }

    #[test]
    fn between_uses_midpoint_and_half_width() {
        let source = FakeSource::new();
        let trips = vec![
            trip("early", "mon", 7 * 3600, 7 * 3600 + 600),
            trip("late", "mon", 10 * 3600, 11 * 3600),
        ];
        let monday = date(2025, 6, 2);
        let current =
            current_trips_between(&source, perth(monday, 7, 5), perth(monday, 8, 0), trips)
                .unwrap();
        assert_eq!(ids(&current), vec!["early"]);
        assert!(matches!(
            current_trips_between(&source, perth(monday, 8, 0), perth(monday, 7, 0), vec![]),
            Err(StoreError::InvalidTimeRange(_))
        ));
    }

    #[test]
    fn empty_input_performs_no_lookups() {
        let source = FakeSource::new();
        let current = current_trips_with_buffer(
            &source,
            perth(date(2025, 6, 2), 8, 0),
            TimeDelta::minutes(10),
            vec![],
        )
        .unwrap();
        assert!(current.is_empty());
        assert_eq!(source.lookups.get(), 0);
    }

    #[test]
    fn services_are_looked_up_once_per_call() {
        let source = FakeSource::new();
        let trips = (0..10)
            .map(|i| trip(&format!("t{i}"), "mon", 8 * 3600, 9 * 3600))
            .collect();
        let current = current_trips_at(&source, perth(date(2025, 6, 2), 8, 30), trips).unwrap();
        assert_eq!(current.len(), 10);
        // route + agency + service + one exception lookup for the query day
        assert_eq!(source.lookups.get(), 4);
    }

    #[test]
    fn unknown_timezone_fails_the_call() {
        let source = FakeSource {
            timezone: Some("Mars/Olympus_Mons".into()),
            ..FakeSource::new()
        };
        let trips = vec![trip("t", "mon", 8 * 3600, 9 * 3600)];
        assert!(matches!(
            current_trips_at(&source, perth(date(2025, 6, 2), 8, 30), trips),
            Err(StoreError::UnknownTimezone { .. })
        ));
    }

    #[test]
    fn missing_service_fails_the_call() {
        let source = FakeSource::new();
        let trips = vec![trip("t", "unknown", 8 * 3600, 9 * 3600)];
        let err = current_trips_at(&source, perth(date(2025, 6, 2), 8, 30), trips).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn missing_service_fails_the_call_outside_the_window() {
        let source = FakeSource::new();
        let trips = vec![
            trip("morning", "mon", 8 * 3600, 9 * 3600),
            trip("evening", "unknown", 18 * 3600, 19 * 3600),
        ];
        let err = current_trips_at(&source, perth(date(2025, 6, 2), 8, 30), trips).unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound { entity: "service", ref key } if key == "unknown"
        ));
    }

    #[test]
    fn negative_buffer_is_rejected() {
        let source = FakeSource::new();
        assert!(matches!(
            current_trips_with_buffer(
                &source,
                perth(date(2025, 6, 2), 8, 0),
                TimeDelta::minutes(-1),
                vec![]
            ),
            Err(StoreError::InvalidTimeRange(_))
        ));
    }
}
