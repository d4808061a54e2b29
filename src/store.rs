use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone};

use crate::collection::Collection;
use crate::container::{self, Container, Metadata, SectionData};
use crate::error::{Result, StoreError};
use crate::model::{
    service_exception_key, Agency, Route, Service, ServiceException, Shape, Stop, Trip,
};
use crate::records::KeyList;
use crate::schedule::{self, ScheduleSource};

pub const AGENCIES: &str = "agencies";
pub const ROUTES: &str = "routes";
pub const STOPS: &str = "stops";
pub const TRIPS: &str = "trips";
pub const SERVICES: &str = "services";
pub const SERVICE_EXCEPTIONS: &str = "service_exceptions";
pub const SHAPES: &str = "shapes";
pub const ROUTES_BY_NAME: &str = "routes_by_name_index";
pub const STOPS_BY_NAME: &str = "stops_by_name_index";
pub const STOPS_BY_PARENT: &str = "stops_by_parent_index";
pub const TRIPS_BY_ROUTE: &str = "trips_by_route_index";

/// A complete, queryable set of collections for one feed.
///
/// A store is either freshly built by ingest (in memory) or loaded from a
/// container file, in which case every collection reads from the mapped file
/// until [`Store::close`] is called or the store is dropped.
pub struct Store {
    metadata: Metadata,
    path: Option<PathBuf>,
    pub(crate) agencies: Collection<Agency>,
    pub(crate) routes: Collection<Route>,
    pub(crate) stops: Collection<Stop>,
    pub(crate) trips: Collection<Trip>,
    pub(crate) services: Collection<Service>,
    pub(crate) service_exceptions: Collection<ServiceException>,
    pub(crate) shapes: Collection<Shape>,
    pub(crate) routes_by_name: Collection<KeyList>,
    pub(crate) stops_by_name: Collection<KeyList>,
    pub(crate) stops_by_parent: Collection<KeyList>,
    pub(crate) trips_by_route: Collection<KeyList>,
}

impl Store {
    /// An empty in-memory store with no backing path.
    pub fn new() -> Self {
        Store {
            metadata: Metadata::new(0),
            path: None,
            agencies: Collection::in_memory("agency"),
            routes: Collection::in_memory("route"),
            stops: Collection::in_memory("stop"),
            trips: Collection::in_memory("trip"),
            services: Collection::in_memory("service"),
            service_exceptions: Collection::in_memory("service exception"),
            shapes: Collection::in_memory("shape"),
            routes_by_name: Collection::in_memory("route name"),
            stops_by_name: Collection::in_memory("stop name"),
            stops_by_parent: Collection::in_memory("stop parent"),
            trips_by_route: Collection::in_memory("route trips"),
        }
    }

    /// Opens a container file. Fails without returning a store if the
    /// version differs, metadata is malformed or any section is missing.
    pub fn load(path: &Path) -> Result<Self> {
        let container = Container::open(path)?;
        let store = Store {
            metadata: *container.metadata(),
            path: Some(path.to_owned()),
            agencies: Collection::new("agency", Box::new(container.section(AGENCIES)?)),
            routes: Collection::new("route", Box::new(container.section(ROUTES)?)),
            stops: Collection::new("stop", Box::new(container.section(STOPS)?)),
            trips: Collection::new("trip", Box::new(container.section(TRIPS)?)),
            services: Collection::new("service", Box::new(container.section(SERVICES)?)),
            service_exceptions: Collection::new(
                "service exception",
                Box::new(container.section(SERVICE_EXCEPTIONS)?),
            ),
            shapes: Collection::new("shape", Box::new(container.section(SHAPES)?)),
            routes_by_name: Collection::new(
                "route name",
                Box::new(container.section(ROUTES_BY_NAME)?),
            ),
            stops_by_name: Collection::new(
                "stop name",
                Box::new(container.section(STOPS_BY_NAME)?),
            ),
            stops_by_parent: Collection::new(
                "stop parent",
                Box::new(container.section(STOPS_BY_PARENT)?),
            ),
            trips_by_route: Collection::new(
                "route trips",
                Box::new(container.section(TRIPS_BY_ROUTE)?),
            ),
        };
        log::info!(
            "Loaded store with {} routes, {} stops and {} trips",
            store.routes.len(),
            store.stops.len(),
            store.trips.len()
        );
        Ok(store)
    }

    /// Releases the container mapping.
    pub fn close(self) {
        if let Some(path) = &self.path {
            log::debug!("Closing store {:?}", path);
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn version(&self) -> u32 {
        self.metadata.version
    }

    pub fn created(&self) -> i64 {
        self.metadata.created
    }

    pub fn max_shape_length(&self) -> u32 {
        self.metadata.max_shape_length
    }

    pub(crate) fn set_max_shape_length(&mut self, max_shape_length: u32) {
        self.metadata.max_shape_length = max_shape_length;
    }

    /// Entry count of every collection and index, in container order.
    pub fn collection_sizes(&self) -> Vec<(&'static str, usize)> {
        vec![
            (AGENCIES, self.agencies.len()),
            (ROUTES, self.routes.len()),
            (STOPS, self.stops.len()),
            (TRIPS, self.trips.len()),
            (SERVICES, self.services.len()),
            (SERVICE_EXCEPTIONS, self.service_exceptions.len()),
            (SHAPES, self.shapes.len()),
            (ROUTES_BY_NAME, self.routes_by_name.len()),
            (STOPS_BY_NAME, self.stops_by_name.len()),
            (STOPS_BY_PARENT, self.stops_by_parent.len()),
            (TRIPS_BY_ROUTE, self.trips_by_route.len()),
        ]
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Persists the store to its backing path.
    pub fn save(&self) -> Result<()> {
        let path = self.path.as_deref().ok_or(StoreError::NoBackingPath)?;
        self.write_to(path)
    }

    /// Persists the store to `path` and makes it the backing path.
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        self.write_to(path)?;
        self.path = Some(path.to_owned());
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<()> {
        let sections = vec![
            SectionData::new(AGENCIES, self.agencies.snapshot()?),
            SectionData::new(ROUTES, self.routes.snapshot()?),
            SectionData::new(STOPS, self.stops.snapshot()?),
            SectionData::new(TRIPS, self.trips.snapshot()?),
            SectionData::new(SERVICES, self.services.snapshot()?),
            SectionData::new(SERVICE_EXCEPTIONS, self.service_exceptions.snapshot()?),
            SectionData::new(SHAPES, self.shapes.snapshot()?),
            SectionData::new(ROUTES_BY_NAME, self.routes_by_name.snapshot()?),
            SectionData::new(STOPS_BY_NAME, self.stops_by_name.snapshot()?),
            SectionData::new(STOPS_BY_PARENT, self.stops_by_parent.snapshot()?),
            SectionData::new(TRIPS_BY_ROUTE, self.trips_by_route.snapshot()?),
        ];
        container::write_container(path, &self.metadata, sections)
    }

    fn first_indexed(index: &Collection<KeyList>, name: &str) -> Result<String> {
        index
            .get(name)?
            .0
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(index.entity(), name))
    }

    fn indexed(index: &Collection<KeyList>, key: &str) -> Result<Vec<String>> {
        Ok(index.find(key)?.map(|ids| ids.0).unwrap_or_default())
    }

    pub fn get_agency_by_id(&self, id: &str) -> Result<Agency> {
        self.agencies.get(id)
    }

    pub fn get_agency_by_route_id(&self, route_id: &str) -> Result<Agency> {
        let route = self.get_route_by_id(route_id)?;
        self.get_agency_by_id(&route.agency_id)
    }

    pub fn get_all_agencies(&self) -> Result<Vec<Agency>> {
        self.agencies.get_all()
    }

    pub fn get_route_by_id(&self, id: &str) -> Result<Route> {
        self.routes.get(id)
    }

    /// The route with the lowest id among those named `name`.
    pub fn get_route_by_name(&self, name: &str) -> Result<Route> {
        let id = Self::first_indexed(&self.routes_by_name, name)?;
        self.get_route_by_id(&id)
    }

    pub fn get_all_routes(&self) -> Result<Vec<Route>> {
        self.routes.get_all()
    }

    pub fn get_stop_by_id(&self, id: &str) -> Result<Stop> {
        self.stops.get(id)
    }

    /// The stop with the lowest id among those named `name`.
    pub fn get_stop_by_name(&self, name: &str) -> Result<Stop> {
        let id = Self::first_indexed(&self.stops_by_name, name)?;
        self.get_stop_by_id(&id)
    }

    /// Child stops of a station. Empty if nothing references `parent_id`.
    pub fn get_stops_by_parent_id(&self, parent_id: &str) -> Result<Vec<Stop>> {
        Self::indexed(&self.stops_by_parent, parent_id)?
            .iter()
            .map(|id| self.get_stop_by_id(id))
            .collect()
    }

    /// Stops served by the route's representative shapes, in route order.
    pub fn get_stops_by_route_id(&self, route_id: &str) -> Result<Vec<Stop>> {
        let route = self.get_route_by_id(route_id)?;
        route
            .stop_ids
            .iter()
            .map(|id| self.get_stop_by_id(id))
            .collect()
    }

    pub fn get_all_stops(&self) -> Result<Vec<Stop>> {
        self.stops.get_all()
    }

    pub fn get_trip_by_id(&self, id: &str) -> Result<Trip> {
        self.trips.get(id)
    }

    pub fn get_trips_by_route_id(&self, route_id: &str) -> Result<Vec<Trip>> {
        Self::indexed(&self.trips_by_route, route_id)?
            .iter()
            .map(|id| self.get_trip_by_id(id))
            .collect()
    }

    pub fn get_all_trips(&self) -> Result<Vec<Trip>> {
        self.trips.get_all()
    }

    pub fn get_service_by_id(&self, id: &str) -> Result<Service> {
        self.services.get(id)
    }

    pub fn get_all_services(&self) -> Result<Vec<Service>> {
        self.services.get_all()
    }

    pub fn get_service_exception(
        &self,
        service_id: &str,
        date: NaiveDate,
    ) -> Result<ServiceException> {
        self.service_exceptions
            .get(&service_exception_key(service_id, date))
    }

    pub fn get_service_exceptions_by_service_id(
        &self,
        service_id: &str,
    ) -> Result<Vec<ServiceException>> {
        let mut exceptions = self
            .service_exceptions
            .scan_where(|exception| exception.service_id == service_id)?;
        exceptions.sort_by_key(|exception| exception.date);
        Ok(exceptions)
    }

    pub fn get_all_service_exceptions(&self) -> Result<Vec<ServiceException>> {
        self.service_exceptions.get_all()
    }

    pub fn get_shape_by_id(&self, id: &str) -> Result<Shape> {
        self.shapes.get(id)
    }

    pub fn get_all_shapes(&self) -> Result<Vec<Shape>> {
        self.shapes.get_all()
    }

    /// Whether the trip's service runs on the service day `date`.
    pub fn is_running_on(&self, trip_id: &str, date: NaiveDate) -> Result<bool> {
        let trip = self.get_trip_by_id(trip_id)?;
        schedule::is_service_running(self, &trip.service_id, date)
    }

    pub fn get_current_trips_with_buffer<Z: TimeZone>(
        &self,
        at: DateTime<Z>,
        buffer: TimeDelta,
        trips: Vec<Trip>,
    ) -> Result<Vec<Trip>> {
        schedule::current_trips_with_buffer(self, at, buffer, trips)
    }

    pub fn get_current_trips_at<Z: TimeZone>(
        &self,
        at: DateTime<Z>,
        trips: Vec<Trip>,
    ) -> Result<Vec<Trip>> {
        schedule::current_trips_at(self, at, trips)
    }

    pub fn get_current_trips_between<Z: TimeZone>(
        &self,
        start: DateTime<Z>,
        end: DateTime<Z>,
        trips: Vec<Trip>,
    ) -> Result<Vec<Trip>> {
        schedule::current_trips_between(self, start, end, trips)
    }

    /// Every trip in the store operating within `buffer` of `at`.
    pub fn get_all_current_trips<Z: TimeZone>(
        &self,
        at: DateTime<Z>,
        buffer: TimeDelta,
    ) -> Result<Vec<Trip>> {
        schedule::current_trips_with_buffer(self, at, buffer, self.get_all_trips()?)
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl ScheduleSource for Store {
    fn route(&self, route_id: &str) -> Result<Route> {
        self.get_route_by_id(route_id)
    }

    fn agency(&self, agency_id: &str) -> Result<Agency> {
        self.get_agency_by_id(agency_id)
    }

    fn service(&self, service_id: &str) -> Result<Service> {
        self.get_service_by_id(service_id)
    }

    fn service_exception(
        &self,
        service_id: &str,
        date: NaiveDate,
    ) -> Result<Option<ServiceException>> {
        self.service_exceptions
            .find(&service_exception_key(service_id, date))
    }
}
