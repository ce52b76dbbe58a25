use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lifecycle state of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    /// Upload URL issued, bytes not yet confirmed
    Requested,
    /// Object verified in the store; the only visible state
    Uploaded,
    /// Object missing at confirmation time
    Failed,
    /// Reserved for soft delete
    Deleted,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Requested => "requested",
            AssetStatus::Uploaded => "uploaded",
            AssetStatus::Failed => "failed",
            AssetStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown asset status: {0}")]
pub struct UnknownStatus(String);

impl FromStr for AssetStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "requested" => Ok(AssetStatus::Requested),
            "uploaded" => Ok(AssetStatus::Uploaded),
            "failed" => Ok(AssetStatus::Failed),
            "deleted" => Ok(AssetStatus::Deleted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for AssetStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Stored asset metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Asset {
    /// Unique asset ID
    pub id: Uuid,
    /// Object store key, unique and never reused
    pub storage_key: String,
    /// Client-declared file name
    pub original_name: String,
    /// Client-declared content type
    pub mime_type: String,
    /// Client-declared size in bytes
    pub byte_size: i64,
    #[sqlx(try_from = "String")]
    pub status: AssetStatus,
    /// ETag reported by the object store at confirmation
    pub integrity_tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Row inserted by an upload request
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub id: Uuid,
    pub storage_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub created_at: DateTime<Utc>,
}

/// Target state of a conditional transition
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Uploaded {
        uploaded_at: DateTime<Utc>,
        integrity_tag: Option<String>,
    },
    Failed,
}

impl StatusUpdate {
    pub fn status(&self) -> AssetStatus {
        match self {
            StatusUpdate::Uploaded { .. } => AssetStatus::Uploaded,
            StatusUpdate::Failed => AssetStatus::Failed,
        }
    }
}

/// Page request over uploaded assets, newest first
#[derive(Debug, Clone, Copy)]
pub struct UploadedPage {
    /// Only rows created strictly before this instant
    pub before: Option<DateTime<Utc>>,
    pub limit: i64,
}

/// Persistence for asset rows.
///
/// Implementations never hand out shared mutable state: every call reads or
/// writes the current row.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn insert(&self, asset: &NewAsset) -> StoreResult<Asset>;

    /// Lookup on id and storage key together
    async fn find_by_id_and_key(&self, id: Uuid, storage_key: &str) -> StoreResult<Option<Asset>>;

    async fn find_uploaded(&self, id: Uuid) -> StoreResult<Option<Asset>>;

    async fn find_uploaded_many(&self, ids: &[Uuid]) -> StoreResult<Vec<Asset>>;

    async fn list_uploaded(&self, page: UploadedPage) -> StoreResult<Vec<Asset>>;

    /// Apply `update` only if the row is currently `expected`.
    ///
    /// Returns false when the row was not in `expected` (or is gone), so
    /// concurrent callers racing on the same row see exactly one `true`.
    async fn transition(
        &self,
        id: Uuid,
        expected: AssetStatus,
        update: StatusUpdate,
    ) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<()>;
}

const ASSET_COLUMNS: &str = "id, storage_key, original_name, mime_type, byte_size, \
                             status, integrity_tag, created_at, uploaded_at";

/// Asset store backed by PostgreSQL
pub struct PgAssetStore {
    pool: PgPool,
}

impl PgAssetStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl AssetStore for PgAssetStore {
    #[instrument(skip(self, asset), fields(asset_id = %asset.id, storage_key = %asset.storage_key))]
    async fn insert(&self, asset: &NewAsset) -> StoreResult<Asset> {
        let sql = format!(
            r#"
            INSERT INTO assets (
                id, storage_key, original_name, mime_type, byte_size,
                status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ASSET_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, Asset>(&sql)
            .bind(asset.id)
            .bind(&asset.storage_key)
            .bind(&asset.original_name)
            .bind(&asset.mime_type)
            .bind(asset.byte_size)
            .bind(AssetStatus::Requested.as_str())
            .bind(asset.created_at)
            .fetch_one(&self.pool)
            .await?;

        debug!("Asset row inserted");
        Ok(row)
    }

    async fn find_by_id_and_key(&self, id: Uuid, storage_key: &str) -> StoreResult<Option<Asset>> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1 AND storage_key = $2");

        let row = sqlx::query_as::<_, Asset>(&sql)
            .bind(id)
            .bind(storage_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn find_uploaded(&self, id: Uuid) -> StoreResult<Option<Asset>> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1 AND status = $2");

        let row = sqlx::query_as::<_, Asset>(&sql)
            .bind(id)
            .bind(AssetStatus::Uploaded.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn find_uploaded_many(&self, ids: &[Uuid]) -> StoreResult<Vec<Asset>> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ANY($1) AND status = $2");

        let rows = sqlx::query_as::<_, Asset>(&sql)
            .bind(ids)
            .bind(AssetStatus::Uploaded.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn list_uploaded(&self, page: UploadedPage) -> StoreResult<Vec<Asset>> {
        let sql = format!(
            r#"
            SELECT {ASSET_COLUMNS}
            FROM assets
            WHERE status = $1
              AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        );

        let rows = sqlx::query_as::<_, Asset>(&sql)
            .bind(AssetStatus::Uploaded.as_str())
            .bind(page.before)
            .bind(page.limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    #[instrument(skip(self, update), fields(to = %update.status()))]
    async fn transition(
        &self,
        id: Uuid,
        expected: AssetStatus,
        update: StatusUpdate,
    ) -> StoreResult<bool> {
        let result = match update {
            StatusUpdate::Uploaded {
                uploaded_at,
                integrity_tag,
            } => {
                sqlx::query(
                    r#"
                    UPDATE assets
                    SET status = $3, uploaded_at = $4, integrity_tag = $5
                    WHERE id = $1 AND status = $2
                    "#,
                )
                .bind(id)
                .bind(expected.as_str())
                .bind(AssetStatus::Uploaded.as_str())
                .bind(uploaded_at)
                .bind(integrity_tag)
                .execute(&self.pool)
                .await?
            }
            StatusUpdate::Failed => {
                sqlx::query("UPDATE assets SET status = $3 WHERE id = $1 AND status = $2")
                    .bind(id)
                    .bind(expected.as_str())
                    .bind(AssetStatus::Failed.as_str())
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
