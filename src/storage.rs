use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    types::{BucketLocationConstraint, CreateBucketConfiguration, ObjectCannedAcl},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::S3Config;

/// Publicly readable object storage keyed by path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes (or overwrites) `key` and returns its public URL.
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    fn public_url(&self, key: &str) -> String;
}

pub(crate) fn public_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
}

/// Adds a scheme when the configured endpoint has none.
pub(crate) fn endpoint_with_scheme(endpoint: &str, use_ssl: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    endpoint: String,
    bucket: String,
    region: String,
}

impl S3Storage {
    pub async fn new(cfg: &S3Config) -> anyhow::Result<Self> {
        let endpoint = endpoint_with_scheme(&cfg.endpoint, cfg.use_ssl);
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&endpoint)
            .force_path_style(cfg.force_path_style)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            endpoint,
            bucket: cfg.bucket.clone(),
            region: cfg.region.clone(),
        })
    }

    /// Makes sure the bucket exists. Failures are logged and swallowed so a
    /// storage hiccup never stops the process from starting.
    pub async fn ensure_bucket(&self) {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            debug!(bucket = %self.bucket, "bucket present");
            return;
        }

        let mut req = self.client.create_bucket().bucket(&self.bucket);
        if self.region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match req.send().await {
            Ok(_) => info!(bucket = %self.bucket, "bucket created"),
            Err(e) => warn!(bucket = %self.bucket, error = %e, "bucket provisioning failed; continuing"),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(self.public_url(key))
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url(&self.endpoint, &self.bucket, key)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_is_endpoint_bucket_key() {
        assert_eq!(
            public_url("http://minio:9000/", "profile-pics", "users/1/avatar.jpg"),
            "http://minio:9000/profile-pics/users/1/avatar.jpg"
        );
    }

    #[test]
    fn scheme_follows_ssl_flag_only_when_missing() {
        assert_eq!(endpoint_with_scheme("minio:9000", false), "http://minio:9000");
        assert_eq!(endpoint_with_scheme("s3.example.com", true), "https://s3.example.com");
        assert_eq!(endpoint_with_scheme("http://minio:9000", true), "http://minio:9000");
    }
}
