/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::sync::Arc;

use crate::backend::s3::S3Backend;
use crate::backend::StorageBackend;
use crate::error::{self, Error};
use crate::operation::stream::DEFAULT_FETCH_SIZE;
use crate::types::{PartSize, RetryConfig};
use crate::MEBIBYTE;

/// Loads [`Config`] from the environment
pub mod loader;

/// Minimum upload part size in bytes
pub(crate) const MIN_MULTIPART_PART_SIZE_BYTES: u64 = 5 * MEBIBYTE;

/// Default block size for playback
pub const DEFAULT_STREAM_BLOCK_SIZE: usize = 1024;

/// Configuration for a [`Client`](crate::client::Client)
#[derive(Debug, Clone)]
pub struct Config {
    bucket: String,
    stream_base_url: Option<String>,
    target_part_size: PartSize,
    stream_block_size: usize,
    fetch_size: u64,
    retry: RetryConfig,
    backend: Arc<dyn StorageBackend>,
}

impl Config {
    /// Create a new `Config` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The bucket every key is resolved against
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Public base URL prepended to keys by `stream_link`
    pub fn stream_base_url(&self) -> Option<&str> {
        self.stream_base_url.as_deref()
    }

    /// Returns a reference to the target part size to use for uploads
    pub fn part_size(&self) -> &PartSize {
        &self.target_part_size
    }

    /// Block size used for playback
    pub fn stream_block_size(&self) -> usize {
        self.stream_block_size
    }

    /// Number of bytes a stream cursor fetches from the backend at a time
    pub fn fetch_size(&self) -> u64 {
        self.fetch_size
    }

    /// How transient backend failures are retried
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// The storage backend requests are sent to
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }
}

/// Fluent style builder for [Config]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    bucket: Option<String>,
    stream_base_url: Option<String>,
    target_part_size: PartSize,
    stream_block_size: Option<usize>,
    fetch_size: Option<u64>,
    retry: RetryConfig,
    backend: Option<Arc<dyn StorageBackend>>,
}

impl Builder {
    /// The bucket every key is resolved against. Required.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub(crate) fn set_bucket(mut self, bucket: Option<String>) -> Self {
        self.bucket = bucket;
        self
    }

    /// Public base URL (e.g. a CDN) prepended to keys by `stream_link`
    pub fn stream_base_url(mut self, url: impl Into<String>) -> Self {
        self.stream_base_url = Some(url.into());
        self
    }

    pub(crate) fn set_stream_base_url(mut self, url: Option<String>) -> Self {
        self.stream_base_url = url;
        self
    }

    /// The target size of each part of a multipart upload.
    ///
    /// The minimum part size is 5 MiB, any part size less than that will be rounded up.
    ///
    /// NOTE: The actual part size used may be larger than the configured part size if
    /// the current value would result in more than 10,000 parts for an upload request.
    ///
    /// Default is [PartSize::Auto]
    pub fn part_size(self, part_size: PartSize) -> Self {
        let part_size = match part_size {
            PartSize::Target(part_size) => {
                PartSize::Target(cmp::max(part_size, MIN_MULTIPART_PART_SIZE_BYTES))
            }
            tps => tps,
        };

        self.set_target_part_size(part_size)
    }

    /// Target part size for a multipart upload.
    ///
    /// NOTE: This does not validate the setting and is meant for internal use only.
    pub(crate) fn set_target_part_size(mut self, part_size: PartSize) -> Self {
        self.target_part_size = part_size;
        self
    }

    /// Block size used for playback. Default is 1024 bytes.
    pub fn stream_block_size(mut self, block_size: usize) -> Self {
        self.stream_block_size = Some(block_size);
        self
    }

    /// Number of bytes a stream cursor fetches from the backend at a time. Default is 1 MiB.
    pub fn fetch_size(mut self, fetch_size: u64) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    /// How transient backend failures are retried
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set an explicit storage backend to use.
    pub fn backend(mut self, backend: impl StorageBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Set an explicit S3 client to use.
    pub fn client(self, client: aws_sdk_s3::Client) -> Self {
        self.backend(S3Backend::new(client))
    }

    /// Consumes the builder and constructs a [`Config`](crate::config::Config)
    pub fn build(self) -> Result<Config, Error> {
        let bucket = self
            .bucket
            .filter(|b| !b.is_empty())
            .ok_or_else(|| error::invalid_input("bucket must be set"))?;
        let backend = self
            .backend
            .ok_or_else(|| error::invalid_input("a storage backend or S3 client must be set"))?;
        let stream_block_size = self.stream_block_size.unwrap_or(DEFAULT_STREAM_BLOCK_SIZE);
        if stream_block_size == 0 {
            return Err(error::invalid_input("stream block size must be greater than zero"));
        }
        let fetch_size = self.fetch_size.unwrap_or(DEFAULT_FETCH_SIZE);
        if fetch_size == 0 {
            return Err(error::invalid_input("fetch size must be greater than zero"));
        }

        Ok(Config {
            bucket,
            stream_base_url: self.stream_base_url,
            target_part_size: self.target_part_size,
            stream_block_size,
            fetch_size,
            retry: self.retry,
            backend,
        })
    }
}
