//! Asset Service
//!
//! Brokers direct client uploads to an S3-compatible object store while
//! tracking asset metadata and lifecycle state in PostgreSQL. File bytes never
//! pass through the service: clients ask for a short-lived signed PUT URL,
//! upload straight to the bucket, then confirm so the service can verify the
//! object and make the asset visible.
//!
//! ## Architecture
//!
//! ```text
//!  Client                 Asset Service                      S3 Bucket
//! ┌────────┐  upload-    ┌──────────────┐  presign PUT/GET  ┌──────────────┐
//! │        │  request    │ Lifecycle    │──────────────────▶│ y=YYYY/      │
//! │        │────────────▶│ Controller   │  head object      │   m=MM/      │
//! │        │             └──────────────┘──────────────────▶│     d=DD/    │
//! │        │  PUT bytes         │                           └──────────────┘
//! │        │────────────────────┼──────────────────────────────────▲
//! │        │  upload-           ▼
//! │        │  complete   ┌──────────────┐                    PostgreSQL
//! │        │────────────▶│ Asset Record │──────────────────▶┌──────────────┐
//! └────────┘             │ Store        │                   │ assets       │
//!                        └──────────────┘                   └──────────────┘
//! ```

pub mod api;
pub mod asset_store;
pub mod config;
pub mod credentials;
pub mod cursor;
pub mod error;
pub mod lifecycle;
pub mod storage_key;
pub mod validation;

pub use api::{create_router, AppState};
pub use asset_store::{Asset, AssetStatus, AssetStore, PgAssetStore};
pub use config::Config;
pub use credentials::{CredentialIssuer, ObjectHead, S3CredentialIssuer};
pub use error::{ApiError, ApiResult};
pub use lifecycle::{AssetService, ServiceSettings};
pub use storage_key::derive_storage_key;
pub use validation::UploadPolicy;
