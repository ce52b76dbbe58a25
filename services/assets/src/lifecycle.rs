//! Upload lifecycle: request, confirm, view, list.
//!
//! ```text
//!   request-upload          confirm-upload (object present)
//!  ───────────────▶ requested ─────────────────────────────▶ uploaded
//!                       │
//!                       │ confirm-upload (object missing / head error)
//!                       ▼
//!                     failed
//! ```
//!
//! Only `uploaded` assets are visible to get, list and view-url issuance.

use crate::asset_store::{Asset, AssetStatus, AssetStore, NewAsset, StatusUpdate, UploadedPage};
use crate::config::Config;
use crate::credentials::CredentialIssuer;
use crate::cursor::{decode_cursor, encode_cursor};
use crate::error::{ApiError, ApiResult};
use crate::storage_key::derive_storage_key;
use crate::validation::UploadPolicy;
use chrono::{DateTime, SubsecRound, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Concurrent GET signings within one view-url batch
const VIEW_URL_CONCURRENCY: usize = 8;

/// Tunables for [`AssetService`], fixed at startup
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub policy: UploadPolicy,
    pub put_ttl: Duration,
    /// Default lifetime of view URLs and the ceiling for caller-supplied TTLs
    pub get_ttl: Duration,
    pub max_view_batch: usize,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: UploadPolicy::from_config(&config.upload),
            put_ttl: config.presign_put_ttl(),
            get_ttl: config.presign_get_ttl(),
            max_view_batch: config.upload.max_view_batch,
        }
    }
}

/// Client-declared upload metadata
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub file_size: i64,
}

/// How the client must send the bytes
#[derive(Debug, Clone, PartialEq)]
pub struct UploadCredential {
    pub method: &'static str,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub asset: Asset,
    pub upload: UploadCredential,
}

#[derive(Debug, Clone)]
pub struct AssetPage {
    pub items: Vec<Asset>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewUrl {
    pub id: Uuid,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Orchestrates the asset lifecycle over a record store and an optional
/// credential issuer. Without an issuer the service is metadata-only.
pub struct AssetService {
    store: Arc<dyn AssetStore>,
    issuer: Option<Arc<dyn CredentialIssuer>>,
    settings: ServiceSettings,
}

impl AssetService {
    pub fn new(
        store: Arc<dyn AssetStore>,
        issuer: Option<Arc<dyn CredentialIssuer>>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            issuer,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    fn issuer(&self) -> ApiResult<&Arc<dyn CredentialIssuer>> {
        self.issuer.as_ref().ok_or(ApiError::ObjectStoreUnavailable)
    }

    /// Validate, record a `requested` asset and hand out an upload URL.
    ///
    /// The row is written before signing; if signing fails the row stays
    /// `requested` and is never shown.
    #[instrument(skip(self, request), fields(file_name = %request.file_name, content_type = %request.content_type))]
    pub async fn request_upload(&self, request: UploadRequest) -> ApiResult<UploadTicket> {
        self.settings
            .policy
            .check(&request.content_type, request.file_size)?;

        let issuer = self.issuer()?;

        let new_asset = NewAsset {
            id: Uuid::new_v4(),
            storage_key: derive_storage_key(&request.file_name),
            original_name: request.file_name,
            mime_type: request.content_type,
            byte_size: request.file_size,
            created_at: Utc::now().trunc_subsecs(6),
        };

        let asset = self.store.insert(&new_asset).await?;

        let url = issuer
            .issue_put(&asset.storage_key, &asset.mime_type, self.settings.put_ttl)
            .await?;

        metrics::counter!("assets.upload.requested").increment(1);
        info!(asset_id = %asset.id, storage_key = %asset.storage_key, "Upload requested");

        let headers = BTreeMap::from([("Content-Type".to_string(), asset.mime_type.clone())]);

        Ok(UploadTicket {
            asset,
            upload: UploadCredential {
                method: "PUT",
                url,
                headers,
                expires_in_secs: self.settings.put_ttl.as_secs(),
            },
        })
    }

    /// Promote a `requested` asset once its object exists.
    ///
    /// Accepted once per asset. A missing object (or a failed existence
    /// check) records `failed` and reports not found.
    #[instrument(skip(self), fields(asset_id = %id))]
    pub async fn confirm_upload(&self, id: Uuid, storage_key: &str) -> ApiResult<()> {
        let asset = self
            .store
            .find_by_id_and_key(id, storage_key)
            .await?
            .ok_or_else(|| ApiError::not_found("Image not found"))?;

        if asset.status != AssetStatus::Requested {
            return Err(already_processed(&asset));
        }

        let issuer = self.issuer()?;

        let head = match issuer.head_object(&asset.storage_key).await {
            Ok(Some(head)) => head,
            Ok(None) => {
                info!(storage_key = %asset.storage_key, "Object missing at confirmation");
                return self.fail_upload(&asset).await;
            }
            Err(e) => {
                warn!(error = %e, storage_key = %asset.storage_key, "Existence check failed");
                return self.fail_upload(&asset).await;
            }
        };

        let promoted = self
            .store
            .transition(
                asset.id,
                AssetStatus::Requested,
                StatusUpdate::Uploaded {
                    uploaded_at: Utc::now(),
                    integrity_tag: head.integrity_tag,
                },
            )
            .await?;

        if !promoted {
            return Err(already_processed(&asset));
        }

        metrics::counter!("assets.upload.confirmed").increment(1);
        info!(storage_key = %asset.storage_key, "Upload confirmed");
        Ok(())
    }

    async fn fail_upload(&self, asset: &Asset) -> ApiResult<()> {
        let marked = self
            .store
            .transition(asset.id, AssetStatus::Requested, StatusUpdate::Failed)
            .await?;

        if !marked {
            return Err(already_processed(asset));
        }

        metrics::counter!("assets.upload.failed").increment(1);
        Err(ApiError::not_found("Object not found in storage"))
    }

    /// Uploaded assets, newest first, paged by creation time
    #[instrument(skip(self))]
    pub async fn list_images(&self, limit: Option<i64>, cursor: Option<&str>) -> ApiResult<AssetPage> {
        let limit = normalize_limit(limit);
        // A cursor that does not decode is refused rather than treated as the first page
        let before = cursor.map(decode_cursor).transpose()?;

        let mut items = self
            .store
            .list_uploaded(UploadedPage {
                before,
                limit: limit + 1,
            })
            .await?;

        let has_more = items.len() as i64 > limit;
        if has_more {
            items.truncate(limit as usize);
        }

        let next_cursor = if has_more {
            items.last().map(|a| encode_cursor(a.created_at))
        } else {
            None
        };

        debug!(count = items.len(), has_more, "Listed images");
        Ok(AssetPage { items, next_cursor })
    }

    /// A single uploaded asset. Unknown, pending and failed ids all look the same.
    pub async fn get_image(&self, id: Uuid) -> ApiResult<Asset> {
        self.store
            .find_uploaded(id)
            .await?
            .ok_or_else(|| ApiError::not_found("Image not found"))
    }

    /// Signed GET URLs for the uploaded assets among `ids`.
    ///
    /// Unknown or invisible ids are left out, as are ids whose signing fails.
    /// Results follow request order and share one expiry computed up front.
    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub async fn issue_view_urls(&self, ids: &[Uuid], ttl_secs: Option<i64>) -> ApiResult<Vec<ViewUrl>> {
        if ids.is_empty() {
            return Err(ApiError::bad_request("At least one request is required"));
        }
        if ids.len() > self.settings.max_view_batch {
            return Err(ApiError::bad_request(format!(
                "Maximum {} images per batch",
                self.settings.max_view_batch
            )));
        }

        let issuer = self.issuer()?;
        let ttl = effective_ttl(ttl_secs, self.settings.get_ttl);

        let unique: Vec<Uuid> = ids
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let resolved: HashMap<Uuid, Asset> = self
            .store
            .find_uploaded_many(&unique)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|_| ApiError::internal("View URL lifetime out of range"))?;

        let pending: Vec<Asset> = ids.iter().filter_map(|id| resolved.get(id).cloned()).collect();

        let results: Vec<ViewUrl> = stream::iter(pending)
            .map(|asset| {
                let issuer = issuer.clone();
                async move {
                    let signed = issuer.issue_get(&asset.storage_key, ttl).await;
                    (asset, signed)
                }
            })
            .buffered(VIEW_URL_CONCURRENCY)
            .filter_map(|(asset, signed)| async move {
                match signed {
                    Ok(url) => Some(ViewUrl {
                        id: asset.id,
                        url,
                        expires_at,
                    }),
                    Err(e) => {
                        warn!(error = %e, asset_id = %asset.id, "Skipping view URL");
                        metrics::counter!("assets.view_urls.skipped").increment(1);
                        None
                    }
                }
            })
            .collect()
            .await;

        metrics::counter!("assets.view_urls.issued").increment(results.len() as u64);
        Ok(results)
    }
}

fn already_processed(asset: &Asset) -> ApiError {
    metrics::counter!("assets.upload.conflict").increment(1);
    debug!(asset_id = %asset.id, "Confirmation rejected, asset already processed");
    ApiError::conflict("Image already processed")
}

/// 1..=100, anything else falls back to the default
pub fn normalize_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(l) if (1..=MAX_PAGE_LIMIT).contains(&l) => l,
        _ => DEFAULT_PAGE_LIMIT,
    }
}

/// Caller TTL is honoured only within `(0, max]`
pub fn effective_ttl(requested_secs: Option<i64>, max: Duration) -> Duration {
    match requested_secs {
        Some(secs) if secs > 0 && (secs as u64) <= max.as_secs() => Duration::from_secs(secs as u64),
        _ => max,
    }
}
