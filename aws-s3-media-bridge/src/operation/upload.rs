/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Operation builders
pub mod builders;

mod handle;
mod output;
mod session;
mod snapshot;

use std::cmp;
use std::sync::Arc;

use aws_smithy_types::error::display::DisplayErrorContext;
pub use handle::UploadHandle;
pub use output::{AbortedUpload, UploadOutput};
pub use session::UploadSession;
pub use snapshot::SessionSnapshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind};
use crate::io::InputStream;
use crate::middleware::retry::{self, RetryPolicy};
use crate::types::{FailedMultipartUploadPolicy, ObjectRef};

/// Maximum number of parts that a single S3 multipart upload supports
pub(crate) const MAX_PARTS: u64 = 10_000;

/// Everything needed to start (or resume) one upload
#[derive(Debug)]
pub(crate) struct UploadInput {
    pub(crate) object: ObjectRef,
    pub(crate) body: InputStream,
    pub(crate) content_type: Option<String>,
    pub(crate) part_size: Option<u64>,
    pub(crate) failed_multipart_upload_policy: FailedMultipartUploadPolicy,
    pub(crate) resume_from: Option<SessionSnapshot>,
}

/// Operation struct for single object upload
#[derive(Clone, Default, Debug)]
pub(crate) struct Upload;

impl Upload {
    /// Create (or resume) the multipart upload and drive it to completion on a spawned task.
    pub(crate) async fn orchestrate(
        handle: Arc<crate::client::Handle>,
        input: UploadInput,
    ) -> Result<UploadHandle, Error> {
        let UploadInput {
            object,
            mut body,
            content_type,
            part_size,
            failed_multipart_upload_policy,
            resume_from,
        } = input;

        let backend = handle.backend().clone();
        let mut session = match resume_from {
            Some(snapshot) => {
                if snapshot.object != object {
                    return Err(crate::error::invalid_input(format!(
                        "cannot resume an upload of {} as {object}",
                        snapshot.object
                    )));
                }
                UploadSession::resume(backend, snapshot, body).await?
            }
            None => {
                let content_length = body.len().await?;
                let part_size = effective_part_size(
                    part_size.unwrap_or_else(|| handle.upload_part_size_bytes()),
                    content_length,
                );
                tracing::trace!(
                    "upload request using multipart upload with part size: {part_size} bytes"
                );
                UploadSession::start(backend, object, body, part_size, content_type.as_deref())
                    .await?
            }
        };

        let token = CancellationToken::new();
        session = session.with_cancellation(token.clone());
        session.set_failed_upload_policy(failed_multipart_upload_policy);
        let upload_id = session.upload_id().to_owned();

        let policy = handle.retry_policy();
        let task = tokio::spawn(run(session, policy));
        Ok(UploadHandle::new(
            task,
            token,
            upload_id,
            failed_multipart_upload_policy,
        ))
    }
}

/// The part size actually used for a source of `content_length` bytes.
///
/// Grows past `configured` when needed to stay within [`MAX_PARTS`].
pub(crate) fn effective_part_size(configured: u64, content_length: u64) -> u64 {
    cmp::max(configured, content_length.div_ceil(MAX_PARTS))
}

async fn run(mut session: UploadSession, mut policy: RetryPolicy) -> Result<UploadOutput, Error> {
    let result = drive(&mut session, &mut policy).await;
    if let Err(err) = &result {
        if !session.state().is_terminal() {
            match session.failed_upload_policy() {
                FailedMultipartUploadPolicy::AbortUpload => {
                    tracing::error!(
                        "multipart upload failed, aborting: {}",
                        DisplayErrorContext(err)
                    );
                    if let Err(abort_err) = session.abort().await {
                        if err.kind() == &ErrorKind::OperationCancelled {
                            // the caller asked for the upload to go away, it is still there
                            let point = session.failure_point(session.next_part_number());
                            return Err(abort_err.at(point));
                        }
                        tracing::error!(
                            "failed to abort upload {}: {}",
                            session.upload_id(),
                            DisplayErrorContext(&abort_err)
                        );
                    }
                }
                FailedMultipartUploadPolicy::Retain => {
                    tracing::warn!(
                        "multipart upload {} failed, retaining {} acknowledged parts",
                        session.upload_id(),
                        session.parts().len()
                    );
                }
            }
        }
    }
    result
}

/// Send every remaining part of `session` and complete it, retrying transient failures.
///
/// Only the part that failed is read and sent again. The retry attempt counter is reset
/// after every acknowledged part.
pub(crate) async fn drive(
    session: &mut UploadSession,
    policy: &mut RetryPolicy,
) -> Result<UploadOutput, Error> {
    loop {
        match session.upload_next().await {
            Ok(exhausted) => {
                policy.on_success();
                if exhausted {
                    break;
                }
            }
            Err(err) => retry_after(session, policy, err).await?,
        }
    }

    loop {
        match session.complete().await {
            Ok(output) => {
                policy.on_success();
                return Ok(output);
            }
            Err(err) => retry_after(session, policy, err).await?,
        }
    }
}

async fn retry_after(
    session: &mut UploadSession,
    policy: &mut RetryPolicy,
    err: Error,
) -> Result<(), Error> {
    let Some(delay) = policy.next_backoff(&err) else {
        return Err(err);
    };
    tracing::warn!(
        "retrying part {} of upload {} in {delay:?} (attempt {}): {}",
        session.next_part_number(),
        session.upload_id(),
        policy.attempts(),
        DisplayErrorContext(&err)
    );
    // nothing borrowed from the session may live across the await, the source isn't `Sync`
    let token = session.cancellation_token().clone();
    let failure_point = session.failure_point(session.next_part_number());
    retry::backoff(delay, &token)
        .await
        .map_err(|cancelled| cancelled.at(failure_point))
}
