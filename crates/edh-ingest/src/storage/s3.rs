use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;
use edh_common::{uri::S3Uri, EdhError, Result};
use tracing::{debug, instrument};

use super::{ObjectStore, ObjectSummary};
use crate::settings::EngineSettings;

/// S3-backed object store shared by every bucket the job touches.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &aws_config::SdkConfig, settings: &EngineSettings) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config)
            .force_path_style(settings.s3_path_style);

        if let Some(endpoint) = &settings.s3_endpoint {
            debug!(endpoint = %endpoint, "Using custom S3 endpoint");
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// `CopyObject` source as `bucket/key`, each key segment percent-encoded.
fn copy_source(source: &S3Uri) -> String {
    let key = source
        .key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", source.bucket, key)
}

fn storage_error(action: &str, target: &str, err: impl std::fmt::Display) -> EdhError {
    EdhError::Storage(format!("Failed to {} {}: {}", action, target, err))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| storage_error("list", &format!("s3://{}/{}", bucket, prefix), e))?;

            objects.extend(response.contents().iter().filter_map(|obj| {
                obj.key().map(|key| {
                    ObjectSummary::new(key, obj.size().unwrap_or(0).max(0) as u64)
                })
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        debug!("Listed {} objects in s3://{}/{}", objects.len(), bucket, prefix);
        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let target = format!("s3://{}/{}", bucket, key);
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("download", &target, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| storage_error("read body of", &target, e))?
            .into_bytes();

        debug!("Downloaded {} bytes from {}", data.len(), target);
        Ok(data)
    }

    #[instrument(skip(self, body), fields(size = body.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|e| storage_error("upload", &format!("s3://{}/{}", bucket, key), e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(source = %source, destination = %destination))]
    async fn copy(&self, source: &S3Uri, destination: &S3Uri) -> Result<()> {
        let copy_source = copy_source(source);

        self.client
            .copy_object()
            .bucket(&destination.bucket)
            .copy_source(&copy_source)
            .key(&destination.key)
            .send()
            .await
            .map_err(|e| storage_error("copy", &source.to_string(), e))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("delete", &format!("s3://{}/{}", bucket, key), e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_source_encodes_key_segments() {
        let plain = S3Uri::new("raw", "inbound/orders/US_20240101.csv");
        assert_eq!(copy_source(&plain), "raw/inbound/orders/US_20240101.csv");

        let awkward = S3Uri::new("raw", "inbound/orders/São Paulo+1_20240101.csv");
        assert_eq!(
            copy_source(&awkward),
            "raw/inbound/orders/S%C3%A3o%20Paulo%2B1_20240101.csv"
        );
    }

    #[test]
    fn test_storage_error_message() {
        let err = storage_error("copy", "s3://raw/inbound/a.csv", "AccessDenied");
        assert_eq!(
            err.to_string(),
            "Object store error: Failed to copy s3://raw/inbound/a.csv: AccessDenied"
        );
    }

    #[test]
    fn test_from_client() {
        let client = Client::from_conf(
            aws_sdk_s3::Config::builder()
                .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                .build(),
        );
        let _store = S3ObjectStore::from_client(client);
    }
}
