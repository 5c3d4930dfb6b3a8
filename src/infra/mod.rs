// Infrastructure adapters implementing the application ports

pub mod csv_exporter;
pub mod file_source;
pub mod http_source;
pub mod json_exporter;
pub mod sqlite_store;

pub use csv_exporter::CsvFileExporter;
pub use file_source::FileSource;
pub use http_source::HttpSource;
pub use json_exporter::JsonFileExporter;
pub use sqlite_store::SqliteStore;
