//! Settings Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error};

const CREATE_SETTINGS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        value_type TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

const CREATE_SET_MEMBERS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS set_members (
        set_name TEXT NOT NULL,
        member TEXT NOT NULL,
        PRIMARY KEY (set_name, member)
    )
"#;

/// SQLite-backed settings store implementation
///
/// The database file is the durable medium shared by the foreground app and
/// the background cycle. WAL mode plus a busy timeout lets both processes
/// read and write without tripping over each other's locks.
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Create a new settings store with the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;

        debug!(path = ?db_path, "Initialized settings store");

        Ok(Self { pool })
    }

    /// Platform data directory location of the sync state database
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join("asset-sync")
            .join("settings.db")
    }

    /// Create an in-memory settings store (for testing)
    ///
    /// Limited to one connection: every SQLite in-memory connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| BridgeError::Storage(format!("Invalid DB options: {}", e)))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::create_table(&pool).await?;

        Ok(Self { pool })
    }

    async fn create_table(pool: &SqlitePool) -> Result<()> {
        for ddl in [CREATE_SETTINGS_TABLE, CREATE_SET_MEMBERS_TABLE] {
            sqlx::query(ddl)
                .execute(pool)
                .await
                .map_err(|e| BridgeError::Storage(format!("Failed to create table: {}", e)))?;
        }
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Set a value with type information
    async fn set_value(&self, key: &str, value: &str, value_type: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, value_type, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                value_type = excluded.value_type,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(value_type)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::Storage(format!("Failed to set setting: {}", e)))?;

        debug!(key = key, value_type = value_type, "Stored setting");
        Ok(())
    }

    /// Get a value and verify its type
    async fn get_value(&self, key: &str, expected_type: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, value_type FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to get setting: {}", e)))?;

        match row {
            Some(row) => {
                let value: String = row.get(0);
                let value_type: String = row.get(1);

                if value_type != expected_type {
                    error!(
                        key = key,
                        expected = expected_type,
                        actual = value_type,
                        "Type mismatch"
                    );
                    return Err(BridgeError::Storage(format!(
                        "Type mismatch for key '{}': expected {}, got {}",
                        key, expected_type, value_type
                    )));
                }

                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn parse<T: FromStr>(key: &str, raw: String) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        raw.parse()
            .map_err(|e| BridgeError::Storage(format!("Parse error for key '{}': {}", key, e)))
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value, "string").await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key, "string").await
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_value(key, &value.to_string(), "bool").await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_value(key, "bool")
            .await?
            .map(|raw| Self::parse(key, raw))
            .transpose()
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_value(key, &value.to_string(), "i64").await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get_value(key, "i64")
            .await?
            .map(|raw| Self::parse(key, raw))
            .transpose()
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to delete setting: {}", e)))?;

        debug!(key = key, "Deleted setting");
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to check key: {}", e)))?;

        Ok(row.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to list keys: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn clear_all(&self) -> Result<()> {
        for statement in ["DELETE FROM settings", "DELETE FROM set_members"] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| BridgeError::Storage(format!("Failed to clear settings: {}", e)))?;
        }

        debug!("Cleared all settings");
        Ok(())
    }

    async fn add_to_set(&self, set: &str, member: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO set_members (set_name, member) VALUES (?, ?)")
            .bind(set)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to add set member: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_from_set(&self, set: &str, member: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM set_members WHERE set_name = ? AND member = ?")
            .bind(set)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to remove set member: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM set_members WHERE set_name = ? AND member = ?")
            .bind(set)
            .bind(member)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to check set member: {}", e)))?;

        Ok(row.is_some())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT member FROM set_members WHERE set_name = ? ORDER BY member")
            .bind(set)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to list set members: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn clear_set(&self, set: &str) -> Result<()> {
        sqlx::query("DELETE FROM set_members WHERE set_name = ?")
            .bind(set)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to clear set: {}", e)))?;

        debug!(set = set, "Cleared set");
        Ok(())
    }
}
