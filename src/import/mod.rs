//! Restaurant spreadsheet import.
//!
//! `pipeline` drives a run; the other modules are its stages: reading the
//! sheet, converting rows, geocoding, diffing, backing up and matching photos.

pub mod backup;
pub mod diff;
pub mod favorites;
pub mod geocode;
pub mod hours;
pub mod photos;
pub mod pipeline;
pub mod run_log;
pub mod sheet;
pub mod tags;
pub mod transform;

pub use diff::Change;
pub use geocode::{Geocoder, MemoryGeocoder, NominatimGeocoder};
pub use photos::PhotoUpload;
pub use pipeline::{ImportMode, ImportOptions, ImportOutcome, ImportPipeline, ImportPreview};
pub use transform::RestaurantRecord;
