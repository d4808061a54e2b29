use chrono::{NaiveDate, Weekday};
use geo::HaversineDistance;

/// Opaque identifier of an entity, unique within its entity type.
pub type Key = String;

pub const SECONDS_IN_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct Agency {
    pub id: Key,
    pub name: String,
    pub url: String,
    /// IANA zone name, e.g. "Australia/Perth".
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: Key,
    pub agency_id: Key,
    pub name: String,
    pub route_type: RouteType,
    pub colour: String,
    /// Derived during ingest, never taken from the source feed.
    pub inbound_shape_id: Option<Key>,
    /// Derived during ingest, never taken from the source feed.
    pub outbound_shape_id: Option<Key>,
    /// Deduplicated stops served by the representative shapes, in visiting order.
    pub stop_ids: Vec<Key>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteType {
    Tram,
    Subway,
    Rail,
    Bus,
    Ferry,
    CableCar,
    Gondola,
    Funicular,
    Trolleybus,
    Monorail,
    /// A code without a named variant.
    Other(u8),
}

impl RouteType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => RouteType::Tram,
            1 => RouteType::Subway,
            2 => RouteType::Rail,
            3 => RouteType::Bus,
            4 => RouteType::Ferry,
            5 => RouteType::CableCar,
            6 => RouteType::Gondola,
            7 => RouteType::Funicular,
            11 => RouteType::Trolleybus,
            12 => RouteType::Monorail,
            other => RouteType::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            RouteType::Tram => 0,
            RouteType::Subway => 1,
            RouteType::Rail => 2,
            RouteType::Bus => 3,
            RouteType::Ferry => 4,
            RouteType::CableCar => 5,
            RouteType::Gondola => 6,
            RouteType::Funicular => 7,
            RouteType::Trolleybus => 11,
            RouteType::Monorail => 12,
            RouteType::Other(other) => other,
        }
    }

    /// The stop mode flag a vehicle of this type provides.
    pub fn mode(self) -> ModeFlags {
        match self {
            RouteType::Bus | RouteType::Trolleybus => ModeFlags::BUS,
            RouteType::Tram
            | RouteType::Subway
            | RouteType::Rail
            | RouteType::Monorail
            | RouteType::Funicular => ModeFlags::RAIL,
            RouteType::Ferry => ModeFlags::FERRY,
            RouteType::CableCar | RouteType::Gondola | RouteType::Other(_) => ModeFlags::NONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Coordinate {
            latitude,
            longitude,
        }
    }

    /// True for the unset `0, 0` position.
    pub fn is_zero(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in kilometres.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        geo::Point::from(*self).haversine_distance(&geo::Point::from(*other)) / 1000.0
    }
}

impl From<Coordinate> for geo::Point {
    fn from(coordinate: Coordinate) -> Self {
        geo::Point::new(coordinate.longitude, coordinate.latitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationType {
    Stop,
    Station,
    EntranceExit,
    GenericNode,
    BoardingArea,
    Unknown,
}

impl LocationType {
    pub fn code(self) -> u8 {
        match self {
            LocationType::Stop => 0,
            LocationType::Station => 1,
            LocationType::EntranceExit => 2,
            LocationType::GenericNode => 3,
            LocationType::BoardingArea => 4,
            LocationType::Unknown => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(LocationType::Stop),
            1 => Some(LocationType::Station),
            2 => Some(LocationType::EntranceExit),
            3 => Some(LocationType::GenericNode),
            4 => Some(LocationType::BoardingArea),
            5 => Some(LocationType::Unknown),
            _ => None,
        }
    }
}

/// Bitmask of the vehicle modes that call at a stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModeFlags(u8);

impl ModeFlags {
    pub const NONE: ModeFlags = ModeFlags(0);
    pub const BUS: ModeFlags = ModeFlags(1 << 0);
    pub const SCHOOL_BUS: ModeFlags = ModeFlags(1 << 1);
    pub const RAIL: ModeFlags = ModeFlags(1 << 2);
    pub const FERRY: ModeFlags = ModeFlags(1 << 3);

    const ALL_BITS: u8 = 0b1111;

    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL_BITS == 0 {
            Some(ModeFlags(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ModeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ModeFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for ModeFlags {
    type Output = ModeFlags;

    fn bitor(self, rhs: ModeFlags) -> ModeFlags {
        ModeFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: Key,
    pub code: String,
    pub name: String,
    /// Parent station for platforms and entrances.
    pub parent_id: Option<Key>,
    pub location: Coordinate,
    pub location_type: LocationType,
    pub supported_modes: ModeFlags,
}

/// The days of the week a service runs. Monday is bit 0, Sunday is bit 6;
/// this order is part of the persisted format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WeekdayFlags(u8);

impl WeekdayFlags {
    pub const MONDAY: WeekdayFlags = WeekdayFlags(1 << 0);
    pub const TUESDAY: WeekdayFlags = WeekdayFlags(1 << 1);
    pub const WEDNESDAY: WeekdayFlags = WeekdayFlags(1 << 2);
    pub const THURSDAY: WeekdayFlags = WeekdayFlags(1 << 3);
    pub const FRIDAY: WeekdayFlags = WeekdayFlags(1 << 4);
    pub const SATURDAY: WeekdayFlags = WeekdayFlags(1 << 5);
    pub const SUNDAY: WeekdayFlags = WeekdayFlags(1 << 6);

    const ALL_BITS: u8 = 0b0111_1111;

    pub fn empty() -> Self {
        WeekdayFlags(0)
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL_BITS == 0 {
            Some(WeekdayFlags(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bools(days: [bool; 7]) -> Self {
        let mut flags = WeekdayFlags::empty();
        for (bit, runs) in days.into_iter().enumerate() {
            if runs {
                flags.0 |= 1 << bit;
            }
        }
        flags
    }

    pub fn set(&mut self, weekday: Weekday) {
        self.0 |= 1 << weekday.num_days_from_monday();
    }

    pub fn contains(self, weekday: Weekday) -> bool {
        self.0 & (1 << weekday.num_days_from_monday()) != 0
    }
}

impl std::ops::BitOr for WeekdayFlags {
    type Output = WeekdayFlags;

    fn bitor(self, rhs: WeekdayFlags) -> WeekdayFlags {
        WeekdayFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub id: Key,
    pub weekdays: WeekdayFlags,
    /// First day of service, inclusive.
    pub start_date: NaiveDate,
    /// Last day of service, inclusive.
    pub end_date: NaiveDate,
}

impl Service {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionType {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceException {
    pub service_id: Key,
    pub date: NaiveDate,
    pub exception_type: ExceptionType,
}

impl ServiceException {
    /// Store key of the exception: the service id followed by the date as
    /// `YYYYMMDD`. The date suffix is fixed-width, so keys never collide.
    pub fn key(&self) -> Key {
        service_exception_key(&self.service_id, self.date)
    }
}

pub fn service_exception_key(service_id: &str, date: NaiveDate) -> Key {
    format!("{}{}", service_id, date.format("%Y%m%d"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: Key,
    /// Polyline in drawing order.
    pub coordinates: Vec<Coordinate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timepoint {
    Approximate,
    Exact,
}

/// A stop call within a trip. Times are seconds since midnight of the trip's
/// service day and exceed 86400 for calls after midnight.
#[derive(Debug, Clone, PartialEq)]
pub struct TripStop {
    pub stop_id: Key,
    pub arrival_time: u32,
    pub departure_time: u32,
    pub timepoint: Timepoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub id: Key,
    pub route_id: Key,
    pub service_id: Key,
    pub shape_id: Key,
    pub direction: Direction,
    pub headsign: String,
    /// Ordered by stop sequence.
    pub stops: Vec<TripStop>,
}

impl Trip {
    /// Arrival at the first stop.
    pub fn start_time(&self) -> u32 {
        self.stops.first().map_or(0, |stop| stop.arrival_time)
    }

    /// Departure from the last stop.
    pub fn end_time(&self) -> u32 {
        self.stops.last().map_or(0, |stop| stop.departure_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_bits_start_at_monday() {
        let mut flags = WeekdayFlags::empty();
        flags.set(Weekday::Mon);
        flags.set(Weekday::Sun);
        assert_eq!(flags.bits(), 0b0100_0001);
        assert!(flags.contains(Weekday::Mon));
        assert!(!flags.contains(Weekday::Tue));
        assert!(flags.contains(Weekday::Sun));
    }

    #[test]
    fn weekday_from_bools() {
        let weekdays = WeekdayFlags::from_bools([true, true, true, true, true, false, false]);
        assert_eq!(
            weekdays,
            WeekdayFlags::MONDAY
                | WeekdayFlags::TUESDAY
                | WeekdayFlags::WEDNESDAY
                | WeekdayFlags::THURSDAY
                | WeekdayFlags::FRIDAY
        );
        assert!(WeekdayFlags::from_bits(0x80).is_none());
    }

    #[test]
    fn route_type_codes() {
        assert_eq!(RouteType::from_code(3), RouteType::Bus);
        assert_eq!(RouteType::from_code(11), RouteType::Trolleybus);
        assert_eq!(RouteType::from_code(99), RouteType::Other(99));
        assert_eq!(RouteType::Monorail.code(), 12);
    }

    #[test]
    fn coordinate_helpers() {
        let origin = Coordinate::new(0.0, 0.0);
        let east = Coordinate::new(0.0, 1.0);
        assert!(origin.is_zero());
        assert!(!east.is_zero());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        // One degree of longitude on the equator.
        let km = origin.distance_to(&east);
        assert!((111.0..111.4).contains(&km), "{km}");
        assert_eq!(east.distance_to(&east), 0.0);
    }

    #[test]
    fn exception_keys_are_fixed_width() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert_eq!(service_exception_key("377", date), "37720250602");
    }

    #[test]
    fn trip_times_of_empty_trip() {
        let trip = Trip {
            id: "t".into(),
            route_id: "r".into(),
            service_id: "s".into(),
            shape_id: String::new(),
            direction: Direction::Outbound,
            headsign: String::new(),
            stops: vec![],
        };
        assert_eq!(trip.start_time(), 0);
        assert_eq!(trip.end_time(), 0);
    }
}
