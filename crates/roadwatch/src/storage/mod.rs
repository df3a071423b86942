//! Storage layer for roadwatch.
//!
//! `SQLite`-backed durable store for incident records and sensor history.
//! Only the persistence sidecar and the CLI open a [`Storage`]; the live
//! dashboard never reads from it on the ingestion path.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::incident::{IncidentKind, IncidentRecord};
use crate::reading::{DrowsinessReading, SensorReading};

/// One row of `sensor_logs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorLog {
    /// Row id, once stored.
    pub id: Option<i64>,
    /// Sensor name (`GPS`, `Radar`, ...).
    pub sensor_type: String,
    /// First value (latitude, angle, left, alcohol value).
    pub value_1: Option<f64>,
    /// Second value (longitude, distance, right).
    pub value_2: Option<f64>,
    /// Third value (speed).
    pub value_3: Option<f64>,
    /// Reading time.
    pub timestamp: DateTime<Utc>,
}

impl SensorLog {
    /// Map a reading to its log row.
    ///
    /// Drowsiness readings are logged to their own table and return `None`.
    #[must_use]
    pub fn from_reading(reading: &SensorReading) -> Option<Self> {
        let (v1, v2, v3) = match reading {
            SensorReading::Gps(r) => (Some(r.latitude), Some(r.longitude), Some(r.speed)),
            SensorReading::Vibration(r) => (Some(r.left), Some(r.right), None),
            SensorReading::Radar(r) => (
                Some(f64::from(r.angle)),
                Some(f64::from(r.distance)),
                None,
            ),
            SensorReading::Alcohol(r) => (Some(r.value), None, None),
            SensorReading::Drowsiness(_) => return None,
        };
        Some(Self {
            id: None,
            sensor_type: reading.channel().log_name().to_string(),
            value_1: v1,
            value_2: v2,
            value_3: v3,
            timestamp: reading.timestamp(),
        })
    }
}

/// One row of `drowsiness_logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrowsinessLog {
    /// Row id.
    pub id: i64,
    /// Drowsy at the time of the reading.
    pub is_drowsy: bool,
    /// Cumulative detector events.
    pub events_count: u64,
    /// Reading time.
    pub timestamp: DateTime<Utc>,
}

/// Storage engine for incidents and sensor history.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert an incident record and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_incident(&self, record: &IncidentRecord) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO incidents (
                kind, latitude, longitude, confidence, vibration, distance,
                temperature, humidity, alcohol, network_strength, gsm_connected,
                escalated, message, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ",
            params![
                record.kind.to_string(),
                record.latitude,
                record.longitude,
                record.confidence,
                record.vibration,
                record.distance,
                record.temperature,
                record.humidity,
                record.alcohol,
                record.network_strength,
                record.gsm_connected,
                record.escalated,
                record.message,
                format_timestamp(record.created_at),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(id, kind = %record.kind, escalated = record.escalated, "Inserted incident");
        Ok(id)
    }

    /// Most recent incidents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_incidents(&self, limit: usize) -> Result<Vec<IncidentRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, kind, latitude, longitude, confidence, vibration, distance,
                   temperature, humidity, alcohol, network_strength, gsm_connected,
                   escalated, message, created_at
            FROM incidents ORDER BY created_at DESC, id DESC LIMIT ?1
            ",
        )?;

        let incidents = stmt
            .query_map([sql_limit(limit)], Self::row_to_incident)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(incidents)
    }

    /// Look up one incident.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn incident(&self, id: i64) -> Result<Option<IncidentRecord>> {
        let record = self
            .conn
            .query_row(
                r"
                SELECT id, kind, latitude, longitude, confidence, vibration, distance,
                       temperature, humidity, alcohol, network_strength, gsm_connected,
                       escalated, message, created_at
                FROM incidents WHERE id = ?1
                ",
                [id],
                Self::row_to_incident,
            )
            .optional()?;
        Ok(record)
    }

    /// Number of stored incidents.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_incidents(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Number of incidents that were escalated to an external contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_escalations(&self) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM incidents WHERE escalated = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Append a drowsiness reading to its history table.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_drowsiness_log(&self, reading: &DrowsinessReading) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO drowsiness_logs (is_drowsy, events_count, timestamp) VALUES (?1, ?2, ?3)",
            params![
                reading.is_drowsy,
                i64::try_from(reading.events).unwrap_or(i64::MAX),
                format_timestamp(reading.timestamp),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent drowsiness history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_drowsiness_logs(&self, limit: usize) -> Result<Vec<DrowsinessLog>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, is_drowsy, events_count, timestamp
            FROM drowsiness_logs ORDER BY timestamp DESC, id DESC LIMIT ?1
            ",
        )?;

        let logs = stmt
            .query_map([sql_limit(limit)], |row| {
                let events: i64 = row.get(2)?;
                let timestamp: String = row.get(3)?;
                Ok(DrowsinessLog {
                    id: row.get(0)?,
                    is_drowsy: row.get(1)?,
                    events_count: u64::try_from(events).unwrap_or(0),
                    timestamp: parse_timestamp(&timestamp),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// Append a sensor history row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_sensor_log(&self, log: &SensorLog) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO sensor_logs (sensor_type, value_1, value_2, value_3, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                log.sensor_type,
                log.value_1,
                log.value_2,
                log.value_3,
                format_timestamp(log.timestamp),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent sensor history rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_sensor_logs(&self, limit: usize) -> Result<Vec<SensorLog>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, sensor_type, value_1, value_2, value_3, timestamp
            FROM sensor_logs ORDER BY timestamp DESC, id DESC LIMIT ?1
            ",
        )?;

        let logs = stmt
            .query_map([sql_limit(limit)], |row| {
                let timestamp: String = row.get(5)?;
                Ok(SensorLog {
                    id: row.get(0)?,
                    sensor_type: row.get(1)?,
                    value_1: row.get(2)?,
                    value_2: row.get(3)?,
                    value_3: row.get(4)?,
                    timestamp: parse_timestamp(&timestamp),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// Delete sensor and drowsiness history older than `max_age`.
    ///
    /// Incidents are never pruned. Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = format_timestamp(Utc::now() - max_age);

        let sensors = self
            .conn
            .execute("DELETE FROM sensor_logs WHERE timestamp < ?1", [&cutoff])?;
        let drowsiness = self
            .conn
            .execute("DELETE FROM drowsiness_logs WHERE timestamp < ?1", [&cutoff])?;

        let affected = sensors + drowsiness;
        if affected > 0 {
            info!("Pruned {} old log rows", affected);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let count = |table: &str| -> Result<i64> {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
        };

        let newest_incident: Option<String> = self
            .conn
            .query_row(
                "SELECT created_at FROM incidents ORDER BY created_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            incidents: count("incidents")?,
            escalations: self.count_escalations()?,
            drowsiness_logs: count("drowsiness_logs")?,
            sensor_logs: count("sensor_logs")?,
            newest_incident: newest_incident.map(|s| parse_timestamp(&s)),
            db_size_bytes,
        })
    }

    fn row_to_incident(row: &rusqlite::Row) -> rusqlite::Result<IncidentRecord> {
        let kind: String = row.get(1)?;
        let created_at: String = row.get(14)?;

        Ok(IncidentRecord {
            id: Some(row.get(0)?),
            kind: IncidentKind::parse(&kind),
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            confidence: row.get(4)?,
            vibration: row.get(5)?,
            distance: row.get(6)?,
            temperature: row.get(7)?,
            humidity: row.get(8)?,
            alcohol: row.get(9)?,
            network_strength: row.get(10)?,
            gsm_connected: row.get(11)?,
            escalated: row.get(12)?,
            message: row.get(13)?,
            created_at: parse_timestamp(&created_at),
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total incident records.
    pub incidents: i64,
    /// Incident records that were escalated.
    pub escalations: i64,
    /// Drowsiness history rows.
    pub drowsiness_logs: i64,
    /// Sensor history rows.
    pub sensor_logs: i64,
    /// Creation time of the newest incident.
    pub newest_incident: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(
        |_| {
            warn!("Unparseable timestamp in database: {}", s);
            DateTime::<Utc>::default()
        },
        |dt| dt.with_timezone(&Utc),
    )
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
