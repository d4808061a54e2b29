//! Read-optimized store for static GTFS schedule data.
//!
//! A feed is ingested once into a [`Store`], saved as a single container
//! file, and later memory-mapped for point lookups, secondary-index lookups
//! and "which trips are operating now" queries.

pub mod codec;
pub mod collection;
pub mod container;
pub mod error;
pub mod export_stations;
pub mod gtfs_source;
pub mod ingest;
pub mod mapped_archive;
pub mod model;
pub mod records;
pub mod schedule;
pub mod store;

pub use container::CURRENT_VERSION;
pub use error::{CodecError, Result, StoreError};
pub use ingest::{build_store, Feed};
pub use schedule::{ScheduleSource, SECONDS_IN_DAY};
pub use store::Store;
