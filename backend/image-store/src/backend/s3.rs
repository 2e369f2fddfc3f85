/// S3 implementation of the object storage seam
///
/// One `aws_sdk_s3::Client` is built per backend and shared by every request;
/// the SDK client is internally reference counted and safe to use concurrently.
use super::{ObjectBackend, ObjectHeaders};
use crate::config::S3Config;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build the client from explicit settings, falling back to the default
    /// credential chain when no access key is configured
    pub async fn from_config(config: &S3Config) -> Result<Self> {
        use aws_sdk_s3::config::{Credentials, Region};

        if config.bucket.is_empty() {
            return Err(StoreError::Config("S3 bucket name is empty".to_string()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "image_store_s3",
            );
            loader = loader.credentials_provider(credentials);
        }

        // S3-compatible storage (MinIO etc.)
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "S3 backend initialized"
        );

        Ok(Self::new(Client::from_conf(s3_config), config.bucket.clone()))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn remote_error(op: &str, key: &str, err: impl std::error::Error) -> StoreError {
    StoreError::Remote(format!("S3 {op} {key} failed: {}", DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        headers: &ObjectHeaders,
    ) -> Result<()> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .set_content_disposition(headers.content_disposition.clone())
            .set_cache_control(headers.cache_control.clone())
            .send()
            .await
            .map_err(|e| remote_error("PUT", key, e))?;

        debug!(key = %key, size, "S3 object uploaded");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()) == Some(true) {
                    StoreError::NotFound(key.to_string())
                } else {
                    remote_error("GET", key, e)
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| remote_error("GET body", key, e))?;
        Ok(body.into_bytes())
    }

    async fn head_object(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()) == Some(true) => Ok(false),
            Err(e) => Err(remote_error("HEAD", key, e)),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| remote_error("DELETE", key, e))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| remote_error("LIST", prefix, e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::Config(format!("Invalid presign expiry: {e}")))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| remote_error("presign", key, e))?;

        Ok(request.uri().to_string())
    }
}
