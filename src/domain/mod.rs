// Data shapes shared by every pipeline stage

pub mod canonical;
pub mod raw;

pub use canonical::{CanonicalRecord, CanonicalValue, Provenance};
pub use raw::{parse_timestamp, MalformedInput, RawBatch, RawEntry, RawRecord, RawValue, SourceMetadata};
