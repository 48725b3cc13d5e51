//! S3 object store wrapper.
//!
//! URLs take the form `s3://<bucket>/<key>`. Credentials come from the
//! explicit env settings when present, otherwise the default provider
//! chain; a custom endpoint (MinIO-style) switches to path-style
//! addressing.

use std::collections::HashMap;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

use manman_core::{Error, Result};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectStore {
    pub async fn from_config(config: &ServerConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.s3_region.clone()));
        if let (Some(access_key), Some(secret_key)) =
            (&config.s3_access_key, &config.s3_secret_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "manman-env",
            ));
        }
        if let Some(endpoint) = &config.s3_endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.s3_endpoint.is_some() {
            builder = builder.force_path_style(true);
        }
        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.s3_bucket.clone(),
        }
    }

    /// Upload an object and return its `s3://` URL.
    pub async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: &[(&str, String)],
    ) -> Result<String> {
        let meta: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_metadata((!meta.is_empty()).then_some(meta))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Error::transient(format!("object upload {key}: {e}")))?;
        Ok(format!("s3://{}/{key}", self.bucket))
    }

    /// Fetch an object by key or `s3://` URL.
    pub async fn get(&self, key_or_url: &str) -> Result<Vec<u8>> {
        let (bucket, key) = parse_object_url(key_or_url, &self.bucket)?;
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Error::transient(format!("object fetch {key}: {e}")))?;
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::transient(format!("object read {key}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }
}

/// Split `s3://bucket/key` (or a bare key) into bucket and key.
fn parse_object_url(input: &str, default_bucket: &str) -> Result<(String, String)> {
    match input.strip_prefix("s3://") {
        Some(rest) => {
            let (bucket, key) = rest
                .split_once('/')
                .ok_or_else(|| Error::validation(format!("bad object URL {input:?}")))?;
            if bucket.is_empty() || key.is_empty() {
                return Err(Error::validation(format!("bad object URL {input:?}")));
            }
            Ok((bucket.to_string(), key.to_string()))
        }
        None => Ok((default_bucket.to_string(), input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_urls_and_bare_keys() {
        assert_eq!(
            parse_object_url("s3://bucket/logs/1/2.log", "fallback").unwrap(),
            ("bucket".to_string(), "logs/1/2.log".to_string())
        );
        assert_eq!(
            parse_object_url("logs/1/2.log", "fallback").unwrap(),
            ("fallback".to_string(), "logs/1/2.log".to_string())
        );
        assert!(parse_object_url("s3://bucket-only", "x").is_err());
    }
}
