/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::sync::Arc;

use crate::config::MIN_MULTIPART_PART_SIZE_BYTES;
use crate::error::{self, Error};
use crate::io::InputStream;
use crate::types::{FailedMultipartUploadPolicy, PartSize};

use super::{SessionSnapshot, UploadHandle, UploadInput};

/// Fluent builder for constructing a single object upload
#[derive(Debug)]
pub struct UploadFluentBuilder {
    handle: Arc<crate::client::Handle>,
    key: Option<String>,
    body: Option<InputStream>,
    content_type: Option<String>,
    part_size: PartSize,
    failed_multipart_upload_policy: FailedMultipartUploadPolicy,
    resume_from: Option<SessionSnapshot>,
}

impl UploadFluentBuilder {
    pub(crate) fn new(handle: Arc<crate::client::Handle>) -> Self {
        Self {
            handle,
            key: None,
            body: None,
            content_type: None,
            part_size: PartSize::Auto,
            failed_multipart_upload_policy: FailedMultipartUploadPolicy::default(),
            resume_from: None,
        }
    }

    /// Initiate the upload.
    ///
    /// The multipart upload is created (or resumed) before this returns, the parts are sent
    /// on a spawned task.
    pub async fn initiate(self) -> Result<UploadHandle, Error> {
        let key = self
            .key
            .ok_or_else(|| error::invalid_input("key must be set"))?;
        let object = self.handle.object(key)?;
        let part_size = match self.part_size {
            PartSize::Auto => None,
            PartSize::Target(size) => Some(size),
        };
        let input = UploadInput {
            object,
            body: self.body.unwrap_or_default(),
            content_type: self.content_type,
            part_size,
            failed_multipart_upload_policy: self.failed_multipart_upload_policy,
            resume_from: self.resume_from,
        };
        crate::operation::upload::Upload::orchestrate(self.handle, input).await
    }

    /// Object key within the configured bucket
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Content to upload
    pub fn body(mut self, body: impl Into<InputStream>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Content type stored with the object
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Override the configured part size for this upload.
    ///
    /// The minimum part size is 5 MiB, any part size less than that will be rounded up.
    pub fn part_size(mut self, part_size: PartSize) -> Self {
        self.part_size = match part_size {
            PartSize::Target(size) => {
                PartSize::Target(cmp::max(size, MIN_MULTIPART_PART_SIZE_BYTES))
            }
            auto => auto,
        };
        self
    }

    /// What to do with the remote upload when this upload fails or is aborted.
    pub fn failed_multipart_upload_policy(mut self, policy: FailedMultipartUploadPolicy) -> Self {
        self.failed_multipart_upload_policy = policy;
        self
    }

    /// Continue a previously started upload instead of creating a new one.
    ///
    /// The snapshot's part size takes precedence over [`Self::part_size`].
    pub fn resume_from(mut self, snapshot: SessionSnapshot) -> Self {
        self.resume_from = Some(snapshot);
        self
    }
}
