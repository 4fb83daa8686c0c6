/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::output::{AbortedUpload, UploadOutput};
use crate::error::{Error, ErrorKind};
use crate::types::FailedMultipartUploadPolicy;

/// Response type for a single upload object request.
///
/// # Cancellation
///
/// The operation can be cancelled either by calling [`Self::abort`] or by cancelling the
/// token returned from [`Self::cancellation_token`]. In both cases the part in flight is
/// not recorded and the upload stops at its next await point. The remote multipart upload
/// is then aborted or retained according to the [`FailedMultipartUploadPolicy`] of the
/// request. If aborting the remote upload fails, that error is returned instead and the
/// multipart upload is left in place.
///
/// Dropping the handle does NOT stop the upload, it keeps running in the background.
#[derive(Debug)]
#[non_exhaustive]
pub struct UploadHandle {
    task: JoinHandle<Result<UploadOutput, Error>>,
    token: CancellationToken,
    upload_id: String,
    policy: FailedMultipartUploadPolicy,
}

impl UploadHandle {
    pub(crate) fn new(
        task: JoinHandle<Result<UploadOutput, Error>>,
        token: CancellationToken,
        upload_id: String,
        policy: FailedMultipartUploadPolicy,
    ) -> Self {
        Self {
            task,
            token,
            upload_id,
            policy,
        }
    }

    /// The multipart upload ID
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// A token that cancels this upload when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Consume the handle and wait for upload to complete
    #[tracing::instrument(skip_all, level = "debug", name = "join-upload")]
    pub async fn join(self) -> Result<UploadOutput, Error> {
        self.task.await?
    }

    /// Stop the upload and wait for it to settle.
    ///
    /// Returns the backend's error if the remote upload should have been aborted but could
    /// not be. Its failure point names the upload that is still pending.
    #[tracing::instrument(skip_all, level = "debug", name = "abort-upload")]
    pub async fn abort(self) -> Result<AbortedUpload, Error> {
        self.token.cancel();
        match self.task.await? {
            Ok(output) => Ok(AbortedUpload::Completed(output)),
            Err(err) if err.kind() == &ErrorKind::OperationCancelled => Ok(match self.policy {
                FailedMultipartUploadPolicy::AbortUpload => AbortedUpload::Aborted {
                    upload_id: self.upload_id,
                },
                FailedMultipartUploadPolicy::Retain => AbortedUpload::Retained {
                    upload_id: self.upload_id,
                },
            }),
            Err(err) => Err(err),
        }
    }
}
