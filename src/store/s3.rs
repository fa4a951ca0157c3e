use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::http::HttpResponse;
use s3::error::{DisplayErrorContext, SdkError};
use s3::primitives::ByteStream;
use s3::types::ObjectCannedAcl;
use std::path::Path;

use crate::config::S3Config;
use crate::store::{ObjectStore, StoreError, Visibility};

/// A repository kept in an S3 (or S3-compatible) bucket.
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Store {
    /// Build a client from explicit credentials, or the default AWS provider
    /// chain when none are configured.
    pub async fn new(config: &S3Config) -> Result<Self, StoreError> {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let mut builder = s3::config::Builder::from(&shared);

        if let Some(region) = &config.region {
            builder = builder.region(s3::config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        match (config.access_key_id(), config.secret_access_key()) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    s3::config::Credentials::new(access_key, secret_key, None, None, "apt-s3");
                builder = builder.credentials_provider(credentials);
            }
            (None, None) => {}
            _ => {
                return Err(StoreError::Other(
                    "both an access key id and a secret access key are required".to_string(),
                ))
            }
        }

        Ok(Self {
            client: s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            prefix: config
                .prefix
                .as_deref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        })
    }

    fn key(&self, path: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, path),
            None => path.to_string(),
        }
    }
}

fn classify<E>(path: &str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = format!("{}: {}", path, DisplayErrorContext(&err));
    match (&err, status) {
        (_, Some(401 | 403)) => StoreError::PermissionDenied(message),
        (SdkError::DispatchFailure(_) | SdkError::TimeoutError(_), _) => {
            StoreError::ServiceUnavailable(message)
        }
        (_, Some(500..=599)) => StoreError::ServiceUnavailable(message),
        _ => StoreError::Other(message),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let missing = err.as_service_error().is_some_and(|e| e.is_no_such_key())
                    || err.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if missing {
                    return Ok(None);
                }
                return Err(classify(path, err));
            }
        };

        let bytes = response.body.collect().await.map_err(|e| {
            StoreError::ServiceUnavailable(format!("{}: reading body: {}", path, e))
        })?;
        Ok(Some(bytes.to_vec()))
    }

    async fn put(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(ByteStream::from(data))
            .content_type(content_type)
            .acl(ObjectCannedAcl::from(visibility.canned_acl()))
            .send()
            .await
            .map_err(|e| classify(path, e))?;
        Ok(())
    }

    async fn put_file(
        &self,
        path: &str,
        local_path: &Path,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{}: {}", local_path.display(), e),
            ))
        })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(body)
            .content_type(content_type)
            .acl(ObjectCannedAcl::from(visibility.canned_acl()))
            .send()
            .await
            .map_err(|e| classify(path, e))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| classify(path, e))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
