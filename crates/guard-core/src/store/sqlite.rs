use super::{ConfigRecord, ConfigStore, StoreError, CONNECT_TIMEOUT};
use crate::{config::StoreConfig, types::TargetPayload};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::str::FromStr;

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT NOT NULL,
        value TEXT NOT NULL
    )
";

const CREATE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS config_key_idx ON config (key)";

/// SQLite-backed [`ConfigStore`]; `value` holds the JSON form of [`TargetPayload`].
pub struct SqliteConfigStore {
    pool: Pool<Sqlite>,
}

impl SqliteConfigStore {
    /// Opens (creating if missing) the database at `database_url` and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectTimeout`] if connect and ping exceed [`CONNECT_TIMEOUT`], or
    /// [`StoreError::Database`] for any other backend failure.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Each in-memory connection is its own database, so keep exactly one alive.
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new().max_connections(1).min_connections(1).idle_timeout(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = tokio::time::timeout(CONNECT_TIMEOUT, async {
            let pool = pool_options.connect_with(options).await?;
            sqlx::query("SELECT 1").execute(&pool).await?;
            Ok::<_, sqlx::Error>(pool)
        })
        .await
        .map_err(|_| StoreError::ConnectTimeout)??;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Connects using the process store settings.
    ///
    /// # Errors
    ///
    /// See [`SqliteConfigStore::connect`].
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.user.is_some() || config.password.is_some() {
            tracing::debug!("DB_USER/DB_PASSWORD are not used by the sqlite config store");
        }
        Self::connect(&config.server).await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    fn encode(key: &str, value: &TargetPayload) -> Result<String, StoreError> {
        serde_json::to_string(value)
            .map_err(|e| StoreError::Corrupt { key: key.to_string(), reason: e.to_string() })
    }

    fn row_to_record(row: &SqliteRow) -> Result<ConfigRecord, StoreError> {
        let key: String = row.try_get("key")?;
        let raw: String = row.try_get("value")?;
        let value = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt { key: key.clone(), reason: e.to_string() })?;
        Ok(ConfigRecord { key, value })
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get(&self, key: &str) -> Result<Option<ConfigRecord>, StoreError> {
        let row = sqlx::query("SELECT key, value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_record(&row)).transpose()
    }

    async fn create(&self, key: &str, value: &TargetPayload) -> Result<(), StoreError> {
        let encoded = Self::encode(key, value)?;
        let result = sqlx::query("INSERT INTO config (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(encoded)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, key: &str, value: &TargetPayload) -> Result<(), StoreError> {
        let encoded = Self::encode(key, value)?;
        let result = sqlx::query("UPDATE config SET value = ? WHERE key = ?")
            .bind(encoded)
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConfigRecord>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM config ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
