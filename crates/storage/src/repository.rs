//! Repository Implementation

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use event_log::EventLog;
use sensor_protocol::{SensorId, SensorRecord, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::StorageError;

/// Default table name
pub const DEFAULT_TABLE: &str = "SensorData";

// Casts pin the decoded storage class regardless of column affinity.
const COLUMNS: &str = "id, sensor_id, \
    CAST(sensor_value AS REAL) AS sensor_value, \
    CAST(sensor_time AS INTEGER) AS sensor_time, \
    CAST(upload_time AS INTEGER) AS upload_time";

/// Database connection settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// sqlx SQLite URL, e.g. `sqlite://sensor.db` or `sqlite::memory:`
    pub url: String,
    /// Table holding the readings
    pub table: String,
    /// Drop and recreate the table on connect
    pub clear_on_start: bool,
    /// Extra connection attempts after the first failure
    pub connect_retries: u32,
    /// Pause before each retry
    pub retry_delay: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://sensor.db".to_string(),
            table: DEFAULT_TABLE.to_string(),
            clear_on_start: true,
            connect_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl StorageConfig {
    /// Private in-memory database, used by tests
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        }
    }
}

/// A persisted reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: i64,
    pub sensor_id: SensorId,
    pub value: f64,
    pub sensor_time: Timestamp,
    pub upload_time: Timestamp,
}

impl StoredReading {
    /// The reading as it arrived on the wire
    pub fn record(&self) -> SensorRecord {
        SensorRecord::new(self.sensor_id, self.value, self.sensor_time)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, StorageError> {
        let sensor_id: i64 = row.try_get("sensor_id")?;
        let sensor_id = SensorId::try_from(sensor_id)
            .map_err(|_| StorageError::InvalidRow(format!("sensor id {} out of range", sensor_id)))?;

        Ok(Self {
            id: row.try_get("id")?,
            sensor_id,
            value: row.try_get("sensor_value")?,
            sensor_time: row.try_get("sensor_time")?,
            upload_time: row.try_get("upload_time")?,
        })
    }
}

/// Repository over the readings table
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    table: String,
}

impl Repository {
    /// Open the database, retrying up to `connect_retries` times, and set up
    /// the table.
    pub async fn connect(config: &StorageConfig, events: &EventLog) -> Result<Self, StorageError> {
        validate_table_name(&config.table)?;
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        let mut attempts = 1;
        let pool = loop {
            match open_pool(options.clone()).await {
                Ok(pool) => break pool,
                Err(e) if attempts <= config.connect_retries => {
                    warn!("Connecting to {} failed (attempt {}): {}", config.url, attempts, e);
                    events.warn("Reconnecting to SQL server.");
                    tokio::time::sleep(config.retry_delay).await;
                    attempts += 1;
                }
                Err(source) => {
                    events.warn("Connection to SQL server could not be established.");
                    return Err(StorageError::Connect {
                        url: config.url.clone(),
                        attempts,
                        source,
                    });
                }
            }
        };

        let repository = Self {
            pool,
            table: config.table.clone(),
        };
        repository.setup_schema(config.clear_on_start, events).await?;

        info!("Repository ready on {} (table {})", config.url, repository.table);
        events.info("Connection to SQL server established.");
        Ok(repository)
    }

    async fn setup_schema(&self, clear: bool, events: &EventLog) -> Result<(), StorageError> {
        let created = if clear {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
                .execute(&self.pool)
                .await?;
            true
        } else {
            let existing: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                    .bind(self.table.as_str())
                    .fetch_one(&self.pool)
                    .await?;
            existing == 0
        };

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {}(\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             sensor_id INTEGER, \
             sensor_value DECIMAL(4,2), \
             sensor_time TIMESTAMP, \
             upload_time TIMESTAMP)",
            self.table
        ))
        .execute(&self.pool)
        .await?;

        if created {
            events.info(format!("New table {} created.", self.table));
        } else {
            debug!("Reusing existing table {}", self.table);
        }
        Ok(())
    }

    /// Store one reading stamped with the current upload time; returns its row id
    pub async fn insert_reading(&self, record: &SensorRecord) -> Result<i64, StorageError> {
        let sql = format!(
            "INSERT INTO {}(sensor_id, sensor_value, sensor_time, upload_time) VALUES (?, ?, ?, ?)",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(i64::from(record.sensor_id))
            .bind(record.value)
            .bind(record.timestamp)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        debug!("Stored reading from sensor {} as row {}", record.sensor_id, id);
        Ok(id)
    }

    /// Every stored reading in insertion order
    pub async fn find_all(&self) -> Result<Vec<StoredReading>, StorageError> {
        let sql = format!("SELECT {} FROM {} ORDER BY id", COLUMNS, self.table);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(StoredReading::from_row).collect()
    }

    /// Readings whose value equals `value`
    pub async fn find_by_value(&self, value: f64) -> Result<Vec<StoredReading>, StorageError> {
        self.find_where("sensor_value = ?", value).await
    }

    /// Readings whose value is above `value`
    pub async fn find_exceeding_value(&self, value: f64) -> Result<Vec<StoredReading>, StorageError> {
        self.find_where("sensor_value > ?", value).await
    }

    /// Readings taken at `timestamp`
    pub async fn find_by_timestamp(
        &self,
        timestamp: Timestamp,
    ) -> Result<Vec<StoredReading>, StorageError> {
        self.find_where("sensor_time = ?", timestamp).await
    }

    /// Readings taken after `timestamp`
    pub async fn find_after_timestamp(
        &self,
        timestamp: Timestamp,
    ) -> Result<Vec<StoredReading>, StorageError> {
        self.find_where("sensor_time > ?", timestamp).await
    }

    async fn find_where<T>(&self, condition: &str, param: T) -> Result<Vec<StoredReading>, StorageError>
    where
        T: for<'q> sqlx::Encode<'q, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + 'static,
    {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY id",
            COLUMNS, self.table, condition
        );
        let rows = sqlx::query(&sql).bind(param).fetch_all(&self.pool).await?;
        rows.iter().map(StoredReading::from_row).collect()
    }

    /// Number of stored readings
    pub async fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Close the pool, waiting for in-flight statements
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Repository closed");
    }
}

async fn open_pool(options: SqliteConnectOptions) -> Result<SqlitePool, sqlx::Error> {
    // One long-lived connection keeps `sqlite::memory:` databases alive.
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Table names are interpolated into SQL, so only plain identifiers pass
fn validate_table_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}
