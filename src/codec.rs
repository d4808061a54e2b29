//! Binary record layout shared by every entity.
//!
//! - text and byte fields: 4-byte big-endian length, then the raw bytes
//! - enums and bitmasks: 1 byte
//! - small integers: 4 bytes, unsigned, big-endian
//! - coordinates: 8-byte IEEE 754 doubles, big-endian
//! - dates: 8-byte Unix timestamp of the UTC midnight starting the day
//! - sequences: 4-byte element count, then each element back to back
//!
//! The record key is never part of the payload; it is the store key.

use chrono::{DateTime, NaiveDate, NaiveTime};

use crate::error::CodecError;
use crate::model::{Coordinate, Key, Timepoint, TripStop, SECONDS_IN_DAY};

pub const LEN_BYTES: usize = 4;
pub const U8_BYTES: usize = 1;
pub const U32_BYTES: usize = 4;
pub const F64_BYTES: usize = 8;
pub const TIME_BYTES: usize = 8;

/// A value with a stable binary encoding. `decode` is the exact inverse of
/// `encode` and rejects truncated or over-long input.
pub trait Record: Sized {
    fn encode_into(&self, writer: &mut RecordWriter);

    fn decode_from(key: &str, reader: &mut RecordReader<'_>) -> Result<Self, CodecError>;

    fn encode(&self) -> Vec<u8> {
        let mut writer = RecordWriter::new();
        self.encode_into(&mut writer);
        writer.into_bytes()
    }

    fn decode(key: &str, data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = RecordReader::new(data);
        let value = Self::decode_from(key, &mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

#[derive(Debug, Default)]
pub struct RecordWriter {
    buffer: Vec<u8>,
}

impl RecordWriter {
    pub fn new() -> Self {
        RecordWriter { buffer: vec![] }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Lengths and counts are 32-bit; no GTFS field comes close to 4 GiB.
    pub fn put_count(&mut self, count: usize) {
        self.put_u32(count as u32);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_count(bytes.len());
        self.buffer.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    pub fn put_date(&mut self, date: NaiveDate) {
        self.put_i64(date.and_time(NaiveTime::MIN).and_utc().timestamp());
    }

    pub fn put_coordinate(&mut self, coordinate: &Coordinate) {
        self.put_f64(coordinate.latitude);
        self.put_f64(coordinate.longitude);
    }

    pub fn put_keys(&mut self, keys: &[Key]) {
        self.put_count(keys.len());
        for key in keys {
            self.put_str(key);
        }
    }

    pub fn put_coordinates(&mut self, coordinates: &[Coordinate]) {
        self.put_count(coordinates.len());
        for coordinate in coordinates {
            self.put_coordinate(coordinate);
        }
    }

    pub fn put_trip_stops(&mut self, stops: &[TripStop]) {
        self.put_count(stops.len());
        for stop in stops {
            self.put_str(&stop.stop_id);
            self.put_u32(stop.arrival_time);
            self.put_u32(stop.departure_time);
            self.put_u8(match stop.timepoint {
                Timepoint::Approximate => 0,
                Timepoint::Exact => 1,
            });
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

pub struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        RecordReader { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(CodecError::SizeMismatch {
                field,
                needed,
                remaining,
            });
        }
        let bytes = &self.data[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(field, N)?);
        Ok(array)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take_array::<U8_BYTES>(field)?[0])
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array(field)?))
    }

    pub fn read_i64(&mut self, field: &'static str) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array(field)?))
    }

    pub fn read_f64(&mut self, field: &'static str) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take_array(field)?))
    }

    pub fn read_count(&mut self, field: &'static str) -> Result<usize, CodecError> {
        Ok(self.read_u32(field)? as usize)
    }

    pub fn read_bytes(&mut self, field: &'static str) -> Result<&'a [u8], CodecError> {
        let len = self.read_count(field)?;
        self.take(field, len)
    }

    pub fn read_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let bytes = self.read_bytes(field)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { field })
    }

    /// An empty string decodes to `None`.
    pub fn read_optional_key(&mut self, field: &'static str) -> Result<Option<Key>, CodecError> {
        let value = self.read_string(field)?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    pub fn read_date(&mut self, field: &'static str) -> Result<NaiveDate, CodecError> {
        let timestamp = self.read_i64(field)?;
        if timestamp.rem_euclid(SECONDS_IN_DAY) != 0 {
            return Err(CodecError::InvalidDate { field, timestamp });
        }
        DateTime::from_timestamp(timestamp, 0)
            .map(|datetime| datetime.date_naive())
            .ok_or(CodecError::InvalidDate { field, timestamp })
    }

    pub fn read_coordinate(&mut self, field: &'static str) -> Result<Coordinate, CodecError> {
        let latitude = self.read_f64(field)?;
        let longitude = self.read_f64(field)?;
        Ok(Coordinate::new(latitude, longitude))
    }

    pub fn read_keys(&mut self, field: &'static str) -> Result<Vec<Key>, CodecError> {
        let count = self.read_count(field)?;
        let mut keys = Vec::with_capacity(count.min(self.remaining() / LEN_BYTES));
        for _ in 0..count {
            keys.push(self.read_string(field)?);
        }
        Ok(keys)
    }

    pub fn read_coordinates(&mut self, field: &'static str) -> Result<Vec<Coordinate>, CodecError> {
        let count = self.read_count(field)?;
        let mut coordinates = Vec::with_capacity(count.min(self.remaining() / (2 * F64_BYTES)));
        for _ in 0..count {
            coordinates.push(self.read_coordinate(field)?);
        }
        Ok(coordinates)
    }

    pub fn read_trip_stops(&mut self, field: &'static str) -> Result<Vec<TripStop>, CodecError> {
        const MIN_STOP_BYTES: usize = LEN_BYTES + 2 * U32_BYTES + U8_BYTES;

        let count = self.read_count(field)?;
        let mut stops = Vec::with_capacity(count.min(self.remaining() / MIN_STOP_BYTES));
        for _ in 0..count {
            let stop_id = self.read_string("trip stop id")?;
            let arrival_time = self.read_u32("trip stop arrival time")?;
            let departure_time = self.read_u32("trip stop departure time")?;
            let timepoint = match self.read_u8("trip stop timepoint")? {
                0 => Timepoint::Approximate,
                1 => Timepoint::Exact,
                value => {
                    return Err(CodecError::InvalidValue {
                        field: "trip stop timepoint",
                        value,
                    })
                }
            };
            stops.push(TripStop {
                stop_id,
                arrival_time,
                departure_time,
                timepoint,
            });
        }
        Ok(stops)
    }

    /// Fails if any bytes were left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(CodecError::TrailingData { remaining }),
        }
    }
}
