use crate::config::S3Config;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Object-store failures. Never retried here.
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("Invalid presign TTL {ttl:?}: {message}")]
    InvalidTtl { ttl: Duration, message: String },

    #[error("Failed to presign {operation} for {key}: {message}")]
    Presign {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error("Failed to inspect {key}: {message}")]
    Head { key: String, message: String },
}

/// What the object store reports about a stored object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    /// Content fingerprint (ETag)
    pub integrity_tag: Option<String>,
    pub content_length: Option<i64>,
}

/// Scoped, expiring credentials for a single object and operation.
///
/// Each call signs afresh; nothing is cached between calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// URL permitting one PUT of `key` with the given content type
    async fn issue_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, IssuerError>;

    /// URL permitting GET of `key`
    async fn issue_get(&self, key: &str, ttl: Duration) -> Result<String, IssuerError>;

    /// `None` when the object does not exist
    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>, IssuerError>;
}

/// S3-backed credential issuer
pub struct S3CredentialIssuer {
    client: S3Client,
    bucket: String,
}

impl S3CredentialIssuer {
    /// Build an issuer from static credentials.
    ///
    /// Returns `None` when credentials are not configured, which puts the
    /// service into metadata-only mode.
    pub async fn from_config(config: &S3Config) -> Result<Option<Self>> {
        let Some((access_key_id, secret_access_key)) = config.static_credentials() else {
            warn!("S3 credentials not provided, object store functionality disabled");
            return Ok(None);
        };

        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "asset-service-config",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 credential issuer initialized"
        );

        Ok(Some(Self {
            client,
            bucket: config.bucket.clone(),
        }))
    }
}

fn presigning_config(ttl: Duration) -> Result<PresigningConfig, IssuerError> {
    PresigningConfig::expires_in(ttl).map_err(|e| IssuerError::InvalidTtl {
        ttl,
        message: e.to_string(),
    })
}

#[async_trait]
impl CredentialIssuer for S3CredentialIssuer {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn issue_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, IssuerError> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config(ttl)?)
            .await
            .map_err(|e| IssuerError::Presign {
                operation: "PUT",
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(key = %key, "Issued upload URL");
        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn issue_get(&self, key: &str, ttl: Duration) -> Result<String, IssuerError> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config(ttl)?)
            .await
            .map_err(|e| IssuerError::Presign {
                operation: "GET",
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>, IssuerError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectHead {
                integrity_tag: output.e_tag().map(String::from),
                content_length: output.content_length(),
            })),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(IssuerError::Head {
                        key: key.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    })
                }
            }
        }
    }
}
