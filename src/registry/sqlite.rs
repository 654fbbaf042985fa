//! SQLite-backed artifact store
//!
//! Three tables: artifact metadata keyed by (market, version), one payload
//! row per family, and a single serving row per market. An artifact and its
//! payloads are inserted in one transaction.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use super::artifact::{ArtifactMetadata, ModelArtifact};
use super::store::ArtifactStore;
use crate::error::{PipelineError, Result};
use crate::ml::ModelPayload;
use crate::types::{Market, ModelVersion};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS artifacts (
    market      TEXT    NOT NULL,
    major       INTEGER NOT NULL,
    minor       INTEGER NOT NULL,
    patch       INTEGER NOT NULL,
    id          TEXT    NOT NULL,
    created_at  TEXT    NOT NULL,
    metadata    TEXT    NOT NULL,
    PRIMARY KEY (market, major, minor, patch)
);
CREATE TABLE IF NOT EXISTS model_payloads (
    market      TEXT    NOT NULL,
    major       INTEGER NOT NULL,
    minor       INTEGER NOT NULL,
    patch       INTEGER NOT NULL,
    family      TEXT    NOT NULL,
    schema_id   TEXT    NOT NULL,
    checksum    TEXT    NOT NULL,
    bytes       BLOB    NOT NULL,
    PRIMARY KEY (market, major, minor, patch, family)
);
CREATE TABLE IF NOT EXISTS serving (
    market      TEXT    PRIMARY KEY,
    version     TEXT    NOT NULL,
    promoted_at TEXT    NOT NULL
);
"#;

#[derive(Debug, sqlx::FromRow)]
struct MetadataRow {
    metadata: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PayloadRow {
    family: String,
    schema_id: String,
    checksum: String,
    bytes: Vec<u8>,
}

#[derive(Debug, sqlx::FromRow)]
struct VersionRow {
    major: i64,
    minor: i64,
    patch: i64,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://models.db` or `sqlite::memory:`) and create tables
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // An in-memory database exists per connection, so keep exactly one
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        tracing::debug!(url, "Opened SQLite artifact store");
        Ok(Self { pool })
    }

    /// Open a database file, expanding `~`
    pub async fn open(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path);
        Self::connect(&format!("sqlite://{}", expanded)).await
    }
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn put(&self, artifact: &ModelArtifact) -> Result<()> {
        let market = artifact.market.as_str();
        let version = artifact.version;
        let (metadata, payloads) = artifact.clone().into_parts();
        let metadata_json = serde_json::to_string(&metadata)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO artifacts (market, major, minor, patch, id, created_at, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(market)
        .bind(version.major as i64)
        .bind(version.minor as i64)
        .bind(version.patch as i64)
        .bind(metadata.id.to_string())
        .bind(metadata.created_at.to_rfc3339())
        .bind(metadata_json)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(PipelineError::DuplicateVersion {
                market: artifact.market,
                version,
            });
        }

        for payload in &payloads {
            sqlx::query(
                "INSERT INTO model_payloads (market, major, minor, patch, family, schema_id, checksum, bytes)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(market)
            .bind(version.major as i64)
            .bind(version.minor as i64)
            .bind(version.patch as i64)
            .bind(payload.family.as_str())
            .bind(&payload.schema)
            .bind(&payload.checksum)
            .bind(&payload.bytes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, market: Market, version: ModelVersion) -> Result<Option<ModelArtifact>> {
        let row: Option<MetadataRow> = sqlx::query_as(
            "SELECT metadata FROM artifacts WHERE market = ? AND major = ? AND minor = ? AND patch = ?",
        )
        .bind(market.as_str())
        .bind(version.major as i64)
        .bind(version.minor as i64)
        .bind(version.patch as i64)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let metadata: ArtifactMetadata = serde_json::from_str(&row.metadata)
            .map_err(|e| PipelineError::CorruptArtifact(format!("{} {} metadata: {}", market, version, e)))?;

        let rows: Vec<PayloadRow> = sqlx::query_as(
            "SELECT family, schema_id, checksum, bytes FROM model_payloads
             WHERE market = ? AND major = ? AND minor = ? AND patch = ?",
        )
        .bind(market.as_str())
        .bind(version.major as i64)
        .bind(version.minor as i64)
        .bind(version.patch as i64)
        .fetch_all(&self.pool)
        .await?;

        let payloads = rows
            .into_iter()
            .map(|row| {
                let family = serde_json::from_value(serde_json::Value::String(row.family.clone()))
                    .map_err(|_| PipelineError::CorruptArtifact(format!("unknown family '{}'", row.family)))?;
                Ok(ModelPayload {
                    family,
                    schema: row.schema_id,
                    checksum: row.checksum,
                    bytes: row.bytes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ModelArtifact::from_parts(metadata, payloads).map(Some)
    }

    async fn versions(&self, market: Market) -> Result<Vec<ModelVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(
            "SELECT major, minor, patch FROM artifacts WHERE market = ? ORDER BY major, minor, patch",
        )
        .bind(market.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let component = |v: i64| {
                    u32::try_from(v).map_err(|_| {
                        PipelineError::CorruptArtifact(format!("{} has an out-of-range version component {}", market, v))
                    })
                };
                Ok(ModelVersion::new(component(row.major)?, component(row.minor)?, component(row.patch)?))
            })
            .collect()
    }

    async fn set_serving(&self, market: Market, version: ModelVersion) -> Result<()> {
        sqlx::query(
            "INSERT INTO serving (market, version, promoted_at) VALUES (?, ?, ?)
             ON CONFLICT(market) DO UPDATE SET version = excluded.version, promoted_at = excluded.promoted_at",
        )
        .bind(market.as_str())
        .bind(version.to_string())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn serving(&self, market: Market) -> Result<Option<ModelVersion>> {
        let version: Option<String> = sqlx::query_scalar("SELECT version FROM serving WHERE market = ?")
            .bind(market.as_str())
            .fetch_optional(&self.pool)
            .await?;

        version
            .map(|v| {
                v.parse()
                    .map_err(|_| PipelineError::CorruptArtifact(format!("{} serving pointer '{}'", market, v)))
            })
            .transpose()
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
