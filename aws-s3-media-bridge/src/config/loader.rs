/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use aws_sdk_s3::config::Credentials;

use crate::config::Builder;
use crate::error::Error;
use crate::types::{PartSize, RetryConfig};
use crate::Config;

/// Environment variable holding the bucket name when none is set explicitly
pub const BUCKET_ENV_VAR: &str = "AWS_S3_MEDIA_BUCKET";

/// Environment variable holding the public stream base URL when none is set explicitly
pub const STREAM_URL_ENV_VAR: &str = "AWS_S3_MEDIA_STREAM_URL";

/// Load [`Config`] from the environment.
///
/// The S3 client is configured through the standard AWS environment (profiles, environment
/// variables, instance metadata). Region and static credentials can be overridden.
#[derive(Default, Debug)]
pub struct ConfigLoader {
    builder: Builder,
    bucket: Option<String>,
    stream_base_url: Option<String>,
    region: Option<String>,
    credentials: Option<Credentials>,
}

impl ConfigLoader {
    /// The bucket every key is resolved against.
    ///
    /// Falls back to the `AWS_S3_MEDIA_BUCKET` environment variable.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Public base URL prepended to keys by `stream_link`.
    ///
    /// Falls back to the `AWS_S3_MEDIA_STREAM_URL` environment variable.
    pub fn stream_base_url(mut self, url: impl Into<String>) -> Self {
        self.stream_base_url = Some(url.into());
        self
    }

    /// Override the AWS region
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Use a static access key instead of the default credentials chain
    pub fn credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "static",
        ));
        self
    }

    /// The target size of each part of a multipart upload.
    ///
    /// The minimum part size is 5 MiB, any part size less than that will be rounded up.
    /// Default is [PartSize::Auto]
    pub fn part_size(mut self, part_size: PartSize) -> Self {
        self.builder = self.builder.part_size(part_size);
        self
    }

    /// Block size used for playback. Default is 1024 bytes.
    pub fn stream_block_size(mut self, block_size: usize) -> Self {
        self.builder = self.builder.stream_block_size(block_size);
        self
    }

    /// Number of bytes a stream cursor fetches from the backend at a time. Default is 1 MiB.
    pub fn fetch_size(mut self, fetch_size: u64) -> Self {
        self.builder = self.builder.fetch_size(fetch_size);
        self
    }

    /// How transient backend failures are retried
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.builder = self.builder.retry(retry);
        self
    }

    /// Load the default configuration
    ///
    /// If fields have been overridden during builder construction, the override values will be
    /// used. Otherwise, the default values for each field will be provided.
    pub async fn load(self) -> Result<Config, Error> {
        let mut loader = aws_config::from_env();
        if let Some(region) = self.region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(credentials) = self.credentials {
            loader = loader.credentials_provider(credentials);
        }
        let shared_config = loader.load().await;
        let s3_client = aws_sdk_s3::Client::new(&shared_config);

        let bucket = self.bucket.or_else(|| env_var(BUCKET_ENV_VAR));
        let stream_base_url = self.stream_base_url.or_else(|| env_var(STREAM_URL_ENV_VAR));
        tracing::debug!(
            "loaded configuration for bucket {bucket:?} in region {:?}",
            shared_config.region()
        );

        self.builder
            .set_bucket(bucket)
            .set_stream_base_url(stream_base_url)
            .client(s3_client)
            .build()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
