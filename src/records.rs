use crate::codec::{Record, RecordReader, RecordWriter};
use crate::error::CodecError;
use crate::model::*;

/// Value of a secondary index entry: the ids sharing one index key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyList(pub Vec<Key>);

impl Record for KeyList {
    fn encode_into(&self, writer: &mut RecordWriter) {
        writer.put_keys(&self.0);
    }

    fn decode_from(_key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        Ok(KeyList(reader.read_keys("ids")?))
    }
}

impl Record for Agency {
    fn encode_into(&self, writer: &mut RecordWriter) {
        writer.put_str(&self.name);
        writer.put_str(&self.url);
        writer.put_str(&self.timezone);
    }

    fn decode_from(key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        Ok(Agency {
            id: key.to_owned(),
            name: reader.read_string("agency name")?,
            url: reader.read_string("agency url")?,
            timezone: reader.read_string("agency timezone")?,
        })
    }
}

impl Record for Route {
    fn encode_into(&self, writer: &mut RecordWriter) {
        writer.put_str(&self.agency_id);
        writer.put_str(&self.name);
        writer.put_u8(self.route_type.code());
        writer.put_str(&self.colour);
        writer.put_str(self.inbound_shape_id.as_deref().unwrap_or_default());
        writer.put_str(self.outbound_shape_id.as_deref().unwrap_or_default());
        writer.put_keys(&self.stop_ids);
    }

    fn decode_from(key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        Ok(Route {
            id: key.to_owned(),
            agency_id: reader.read_string("route agency id")?,
            name: reader.read_string("route name")?,
            route_type: RouteType::from_code(reader.read_u8("route type")?),
            colour: reader.read_string("route colour")?,
            inbound_shape_id: reader.read_optional_key("route inbound shape id")?,
            outbound_shape_id: reader.read_optional_key("route outbound shape id")?,
            stop_ids: reader.read_keys("route stops")?,
        })
    }
}

impl Record for Stop {
    fn encode_into(&self, writer: &mut RecordWriter) {
        writer.put_str(&self.code);
        writer.put_str(&self.name);
        writer.put_str(self.parent_id.as_deref().unwrap_or_default());
        writer.put_coordinate(&self.location);
        writer.put_u8(self.location_type.code());
        writer.put_u8(self.supported_modes.bits());
    }

    fn decode_from(key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        let code = reader.read_string("stop code")?;
        let name = reader.read_string("stop name")?;
        let parent_id = reader.read_optional_key("stop parent id")?;
        let location = reader.read_coordinate("stop location")?;
        let location_type = reader.read_u8("stop location type")?;
        let location_type =
            LocationType::from_code(location_type).ok_or(CodecError::InvalidValue {
                field: "stop location type",
                value: location_type,
            })?;
        let modes = reader.read_u8("stop supported modes")?;
        let supported_modes = ModeFlags::from_bits(modes).ok_or(CodecError::InvalidValue {
            field: "stop supported modes",
            value: modes,
        })?;
        Ok(Stop {
            id: key.to_owned(),
            code,
            name,
            parent_id,
            location,
            location_type,
            supported_modes,
        })
    }
}

impl Record for Service {
    fn encode_into(&self, writer: &mut RecordWriter) {
        writer.put_u8(self.weekdays.bits());
        writer.put_date(self.start_date);
        writer.put_date(self.end_date);
    }

    fn decode_from(key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        let bits = reader.read_u8("service weekdays")?;
        let weekdays = WeekdayFlags::from_bits(bits).ok_or(CodecError::InvalidValue {
            field: "service weekdays",
            value: bits,
        })?;
        Ok(Service {
            id: key.to_owned(),
            weekdays,
            start_date: reader.read_date("service start date")?,
            end_date: reader.read_date("service end date")?,
        })
    }
}

impl Record for ServiceException {
    fn encode_into(&self, writer: &mut RecordWriter) {
        writer.put_str(&self.service_id);
        writer.put_date(self.date);
        writer.put_u8(match self.exception_type {
            ExceptionType::Added => 0,
            ExceptionType::Removed => 1,
        });
    }

    /// The key is derived from the content, so a mismatch means the record
    /// was stored under the wrong key.
    fn decode_from(key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        let service_id = reader.read_string("exception service id")?;
        let date = reader.read_date("exception date")?;
        let exception_type = match reader.read_u8("exception type")? {
            0 => ExceptionType::Added,
            1 => ExceptionType::Removed,
            value => {
                return Err(CodecError::InvalidValue {
                    field: "exception type",
                    value,
                })
            }
        };
        let exception = ServiceException {
            service_id,
            date,
            exception_type,
        };
        let expected = exception.key();
        if expected != key {
            return Err(CodecError::KeyMismatch {
                key: key.to_owned(),
                expected,
            });
        }
        Ok(exception)
    }
}

impl Record for Shape {
    fn encode_into(&self, writer: &mut RecordWriter) {
        writer.put_coordinates(&self.coordinates);
    }

    fn decode_from(key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        Ok(Shape {
            id: key.to_owned(),
            coordinates: reader.read_coordinates("shape coordinates")?,
        })
    }
}

impl Record for Trip {
    fn encode_into(&self, writer: &mut RecordWriter) {
        writer.put_str(&self.route_id);
        writer.put_str(&self.service_id);
        writer.put_str(&self.shape_id);
        writer.put_u8(match self.direction {
            Direction::Outbound => 0,
            Direction::Inbound => 1,
        });
        writer.put_str(&self.headsign);
        writer.put_trip_stops(&self.stops);
    }

    fn decode_from(key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError> {
        let route_id = reader.read_string("trip route id")?;
        let service_id = reader.read_string("trip service id")?;
        let shape_id = reader.read_string("trip shape id")?;
        let direction = match reader.read_u8("trip direction")? {
            0 => Direction::Outbound,
            1 => Direction::Inbound,
            value => {
                return Err(CodecError::InvalidValue {
                    field: "trip direction",
                    value,
                })
            }
        };
        Ok(Trip {
            id: key.to_owned(),
            route_id,
            service_id,
            shape_id,
            direction,
            headsign: reader.read_string("trip headsign")?,
            stops: reader.read_trip_stops("trip stops")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn agency() -> Agency {
        Agency {
            id: "WES-RAI".into(),
            name: "Transperth Trains".into(),
            url: "https://www.transperth.wa.gov.au".into(),
            timezone: "Australia/Perth".into(),
        }
    }

    fn route() -> Route {
        Route {
            id: "WES-RAI-1827".into(),
            agency_id: "WES-RAI".into(),
            name: "Yanchep Line".into(),
            route_type: RouteType::Rail,
            colour: "FFD100".into(),
            inbound_shape_id: Some("shape-in".into()),
            outbound_shape_id: None,
            stop_ids: vec!["12667".into(), "99999".into()],
        }
    }

    fn stop() -> Stop {
        Stop {
            id: "12667".into(),
            code: "".into(),
            name: "Glendalough Stn".into(),
            parent_id: Some("PTA-1".into()),
            location: Coordinate::new(-90.0, 180.0),
            location_type: LocationType::BoardingArea,
            supported_modes: ModeFlags::BUS | ModeFlags::RAIL,
        }
    }

    fn service() -> Service {
        Service {
            id: "377".into(),
            weekdays: WeekdayFlags::MONDAY | WeekdayFlags::SUNDAY,
            start_date: date(2025, 1, 1),
            end_date: date(2025, 12, 31),
        }
    }

    fn exception() -> ServiceException {
        ServiceException {
            service_id: "377".into(),
            date: date(2025, 6, 2),
            exception_type: ExceptionType::Removed,
        }
    }

    fn shape() -> Shape {
        Shape {
            id: "shape-in".into(),
            coordinates: vec![
                Coordinate::new(90.0, -180.0),
                Coordinate::new(-31.9, 115.8),
            ],
        }
    }

    fn trip() -> Trip {
        Trip {
            id: "5163491".into(),
            route_id: "WES-RAI-1827".into(),
            service_id: "377".into(),
            shape_id: "shape-in".into(),
            direction: Direction::Inbound,
            headsign: "Perth".into(),
            stops: vec![
                TripStop {
                    stop_id: "12667".into(),
                    arrival_time: 85_800,
                    departure_time: 85_830,
                    timepoint: Timepoint::Exact,
                },
                TripStop {
                    stop_id: "99999".into(),
                    arrival_time: 86_700,
                    departure_time: 86_700,
                    timepoint: Timepoint::Approximate,
                },
            ],
        }
    }

    fn assert_roundtrip<T: Record + PartialEq + std::fmt::Debug>(key: &str, value: &T) {
        let bytes = value.encode();
        assert_eq!(&T::decode(key, &bytes).unwrap(), value);
    }

    fn assert_detects_corruption<T: Record + std::fmt::Debug>(key: &str, value: &T) {
        let bytes = value.encode();
        for len in 0..bytes.len() {
            assert!(
                T::decode(key, &bytes[..len]).is_err(),
                "truncation to {len} bytes was accepted"
            );
        }
        let mut extended = bytes.clone();
        extended.push(0);
        assert_eq!(
            T::decode(key, &extended).unwrap_err(),
            CodecError::TrailingData { remaining: 1 }
        );
    }

    #[test]
    fn entities_roundtrip() {
        assert_roundtrip("WES-RAI", &agency());
        assert_roundtrip("WES-RAI-1827", &route());
        assert_roundtrip("12667", &stop());
        assert_roundtrip("377", &service());
        assert_roundtrip(&exception().key(), &exception());
        assert_roundtrip("shape-in", &shape());
        assert_roundtrip("5163491", &trip());
        assert_roundtrip("Yanchep Line", &KeyList(vec!["a".into(), "".into()]));
    }

    #[test]
    fn empty_values_roundtrip() {
        let empty_agency = Agency {
            id: "".into(),
            name: "".into(),
            url: "".into(),
            timezone: "".into(),
        };
        assert_roundtrip("", &empty_agency);
        assert_roundtrip(
            "empty",
            &Shape {
                id: "empty".into(),
                coordinates: vec![],
            },
        );
        let mut route = route();
        route.inbound_shape_id = None;
        route.stop_ids.clear();
        assert_roundtrip("WES-RAI-1827", &route);
        assert_roundtrip("none", &KeyList::default());
    }

    #[test]
    fn corruption_is_detected() {
        assert_detects_corruption("WES-RAI", &agency());
        assert_detects_corruption("WES-RAI-1827", &route());
        assert_detects_corruption("12667", &stop());
        assert_detects_corruption("377", &service());
        assert_detects_corruption(&exception().key(), &exception());
        assert_detects_corruption("shape-in", &shape());
        assert_detects_corruption("5163491", &trip());
        assert_detects_corruption("Yanchep Line", &KeyList(vec!["a".into()]));
    }

    #[test]
    fn id_is_not_part_of_payload() {
        let decoded = Agency::decode("other", &agency().encode()).unwrap();
        assert_eq!(decoded.id, "other");
        assert_eq!(decoded.name, "Transperth Trains");
    }

    #[test]
    fn exception_under_wrong_key_is_rejected() {
        let bytes = exception().encode();
        assert!(matches!(
            ServiceException::decode("37720250603", &bytes),
            Err(CodecError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn service_layout() {
        let bytes = service().encode();
        assert_eq!(bytes.len(), 1 + 8 + 8);
        assert_eq!(bytes[0], 0b0100_0001);
    }

    #[test]
    fn invalid_enum_bytes_are_rejected() {
        let mut bytes = trip().encode();
        // direction byte follows the three length-prefixed ids
        let direction_offset = 4 + "WES-RAI-1827".len() + 4 + "377".len() + 4 + "shape-in".len();
        bytes[direction_offset] = 7;
        assert_eq!(
            Trip::decode("5163491", &bytes).unwrap_err(),
            CodecError::InvalidValue {
                field: "trip direction",
                value: 7
            }
        );
    }
}
