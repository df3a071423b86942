//! `SQLite` schema definitions for roadwatch.
//!
//! Timestamps are stored as RFC 3339 text so that lexical order matches
//! chronological order.

/// SQL statement to create the incidents table.
pub const CREATE_INCIDENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    latitude REAL NOT NULL DEFAULT 0,
    longitude REAL NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0,
    vibration REAL NOT NULL DEFAULT 0,
    distance REAL NOT NULL DEFAULT -1,
    temperature REAL NOT NULL DEFAULT 0,
    humidity REAL NOT NULL DEFAULT 0,
    alcohol REAL NOT NULL DEFAULT 0,
    network_strength REAL NOT NULL DEFAULT 0,
    gsm_connected INTEGER NOT NULL DEFAULT 0,
    escalated INTEGER NOT NULL DEFAULT 0,
    message TEXT,
    created_at TEXT NOT NULL
)
";

/// Index for "latest incidents" queries.
pub const CREATE_INCIDENTS_CREATED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_incidents_created_at ON incidents(created_at DESC)
";

/// Index for counting escalations.
pub const CREATE_INCIDENTS_ESCALATED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_incidents_escalated ON incidents(escalated)
";

/// SQL statement to create the drowsiness log table.
pub const CREATE_DROWSINESS_LOGS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS drowsiness_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    is_drowsy INTEGER NOT NULL,
    events_count INTEGER NOT NULL,
    timestamp TEXT NOT NULL
)
";

/// Index for drowsiness history reads and pruning.
pub const CREATE_DROWSINESS_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_drowsiness_logs_timestamp ON drowsiness_logs(timestamp DESC)
";

/// SQL statement to create the generic sensor log table.
pub const CREATE_SENSOR_LOGS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sensor_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sensor_type TEXT NOT NULL,
    value_1 REAL,
    value_2 REAL,
    value_3 REAL,
    timestamp TEXT NOT NULL
)
";

/// Index for sensor history reads and pruning.
pub const CREATE_SENSOR_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sensor_logs_timestamp ON sensor_logs(timestamp DESC)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_INCIDENTS_TABLE,
    CREATE_INCIDENTS_CREATED_INDEX,
    CREATE_INCIDENTS_ESCALATED_INDEX,
    CREATE_DROWSINESS_LOGS_TABLE,
    CREATE_DROWSINESS_TIMESTAMP_INDEX,
    CREATE_SENSOR_LOGS_TABLE,
    CREATE_SENSOR_TIMESTAMP_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn test_tables_created_before_their_indexes() {
        let position = |needle: &str| {
            SCHEMA_STATEMENTS
                .iter()
                .position(|s| s.contains(needle))
                .unwrap()
        };
        assert!(position("TABLE IF NOT EXISTS incidents") < position("idx_incidents_created_at"));
        assert!(position("TABLE IF NOT EXISTS sensor_logs") < position("idx_sensor_logs_timestamp"));
    }

    #[test]
    fn test_incidents_table_columns() {
        for column in ["kind TEXT NOT NULL", "escalated INTEGER", "created_at TEXT NOT NULL"] {
            assert!(CREATE_INCIDENTS_TABLE.contains(column), "missing {column}");
        }
    }
}
