use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::app::ports::{ExportPort, ExportSummary};
use crate::domain::canonical::format_timestamp;
use crate::domain::CanonicalRecord;
use crate::error::{EtlError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::dedupe::IdentityKey;
use crate::pipeline::RunReport;

/// SHA-256 over a record's fields and data source. Timestamps are left out
/// so reprocessing identical input yields the same hash.
pub fn content_hash(record: &CanonicalRecord) -> Result<String> {
    let fields: Vec<(&str, &crate::domain::CanonicalValue)> = record.fields().collect();
    let canonical = serde_json::to_string(&(&fields, &record.provenance.data_source))?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Row counts from one upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Canonical records upserted into one SQLite table, keyed by domain and
/// primary identity key
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS canonical_records (
                domain        TEXT NOT NULL,
                record_key    TEXT NOT NULL,
                content_hash  TEXT NOT NULL,
                payload       TEXT NOT NULL,
                data_source   TEXT NOT NULL,
                scraped_at    TEXT NOT NULL,
                processed_at  TEXT NOT NULL,
                stored_at     TEXT NOT NULL,
                PRIMARY KEY (domain, record_key)
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert new records, rewrite changed ones and leave identical ones
    /// untouched.
    pub fn upsert(&self, domain: &str, records: &[CanonicalRecord], key: &IdentityKey) -> Result<UpsertCounts> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut counts = UpsertCounts::default();
        let stored_at = format_timestamp(&Utc::now());

        for record in records {
            let record_key = key.key_of(record).ok_or_else(|| {
                EtlError::Settings(format!("record is missing identity fields {:?}", key.fields()))
            })?;
            let hash = content_hash(record)?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT content_hash FROM canonical_records WHERE domain = ?1 AND record_key = ?2",
                    params![domain, record_key],
                    |row| row.get(0),
                )
                .optional()?;

            if existing.as_deref() == Some(hash.as_str()) {
                counts.unchanged += 1;
                continue;
            }
            if existing.is_some() {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }

            tx.execute(
                r#"
                INSERT INTO canonical_records
                    (domain, record_key, content_hash, payload, data_source, scraped_at, processed_at, stored_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(domain, record_key) DO UPDATE SET
                    content_hash = excluded.content_hash,
                    payload      = excluded.payload,
                    data_source  = excluded.data_source,
                    scraped_at   = excluded.scraped_at,
                    processed_at = excluded.processed_at,
                    stored_at    = excluded.stored_at
                "#,
                params![
                    domain,
                    record_key,
                    hash,
                    serde_json::to_string(record)?,
                    record.provenance.data_source,
                    format_timestamp(&record.provenance.scraped_at),
                    format_timestamp(&record.provenance.processed_at),
                    stored_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(counts)
    }

    pub fn count(&self, domain: &str) -> Result<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM canonical_records WHERE domain = ?1",
            params![domain],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Stored JSON payload of one record
    pub fn payload(&self, domain: &str, record_key: &str) -> Result<Option<String>> {
        let conn = self.lock();
        let payload = conn
            .query_row(
                "SELECT payload FROM canonical_records WHERE domain = ?1 AND record_key = ?2",
                params![domain, record_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }
}

#[async_trait]
impl ExportPort for SqliteStore {
    fn format(&self) -> &'static str {
        "sqlite"
    }

    async fn export(&self, report: &RunReport, key: Option<&IdentityKey>) -> Result<ExportSummary> {
        let key = key.ok_or_else(|| {
            EtlError::Settings(format!(
                "domain '{}' has no identity key; sqlite export needs one",
                report.stats.domain
            ))
        })?;
        let counts = self.upsert(&report.stats.domain, &report.records, key)?;
        metrics::export::store_rows(counts.inserted, counts.updated, counts.unchanged);
        debug!(
            inserted = counts.inserted,
            updated = counts.updated,
            unchanged = counts.unchanged,
            "Upserted canonical records"
        );

        Ok(ExportSummary {
            format: self.format(),
            target: format!("sqlite:{}", report.stats.domain),
            written: counts.inserted + counts.updated,
            unchanged: counts.unchanged,
        })
    }
}
