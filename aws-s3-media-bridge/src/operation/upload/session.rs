/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use aws_smithy_types::error::display::DisplayErrorContext;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::output::UploadOutput;
use super::snapshot::SessionSnapshot;
use super::MAX_PARTS;
use crate::backend::StorageBackend;
use crate::error::{self, Error, ErrorKind, FailurePoint};
use crate::io::InputStream;
use crate::types::{CompletedPart, FailedMultipartUploadPolicy, ObjectRef, SessionState};

/// A sequential multipart upload of one source to one object.
///
/// The session only records a part after the backend acknowledged it. A part that fails
/// with a transient error leaves the session untouched, so calling [`upload_next`] again
/// re-reads and re-sends the same byte range. A non-transient failure moves the session to
/// [`SessionState::Aborted`].
///
/// [`upload_next`]: UploadSession::upload_next
#[derive(Debug)]
pub struct UploadSession {
    backend: Arc<dyn StorageBackend>,
    object: ObjectRef,
    source: InputStream,
    source_len: u64,
    part_size: u64,
    upload_id: String,
    parts: Vec<CompletedPart>,
    state: SessionState,
    token: CancellationToken,
    failed_upload_policy: FailedMultipartUploadPolicy,
    remote_aborted: bool,
}

impl UploadSession {
    /// Create a multipart upload for `object` that will be filled from `source` in parts of
    /// `part_size` bytes.
    pub async fn begin(
        backend: Arc<dyn StorageBackend>,
        object: ObjectRef,
        source: InputStream,
        part_size: u64,
    ) -> Result<UploadSession, Error> {
        Self::start(backend, object, source, part_size, None).await
    }

    pub(crate) async fn start(
        backend: Arc<dyn StorageBackend>,
        object: ObjectRef,
        mut source: InputStream,
        part_size: u64,
        content_type: Option<&str>,
    ) -> Result<UploadSession, Error> {
        let source_len = source.len().await?;
        validate_part_count(source_len, part_size)?;

        let upload_id = backend
            .create_multipart_upload(&object, content_type)
            .instrument(tracing::debug_span!("send-create-multipart-upload", %object))
            .await
            .map_err(|err| {
                if err.is_transient() {
                    err
                } else {
                    err.into_kind(ErrorKind::BackendUnavailable)
                }
            })?;
        tracing::trace!("multipart upload started with upload id: {upload_id}");

        Ok(UploadSession {
            backend,
            object,
            source,
            source_len,
            part_size,
            upload_id,
            parts: Vec::new(),
            state: SessionState::Initiated,
            token: CancellationToken::new(),
            failed_upload_policy: FailedMultipartUploadPolicy::default(),
            remote_aborted: false,
        })
    }

    /// Reconstruct a session from `snapshot` and continue from the first part the backend
    /// has not acknowledged.
    ///
    /// The backend's part list is authoritative. It must start at part 1 without gaps, contain
    /// every part recorded in the snapshot with the same entity tag, and describe a prefix of
    /// `source` cut into `part_size` pieces. Otherwise the upload cannot be resumed and
    /// [`ErrorKind::IncompleteUpload`] is returned.
    pub async fn resume(
        backend: Arc<dyn StorageBackend>,
        snapshot: SessionSnapshot,
        mut source: InputStream,
    ) -> Result<UploadSession, Error> {
        let SessionSnapshot {
            object,
            upload_id,
            part_size,
            parts: recorded,
        } = snapshot;
        let source_len = source.len().await?;
        validate_part_count(source_len, part_size)?;

        let remote = backend
            .list_parts(&object, &upload_id)
            .instrument(tracing::debug_span!("send-list-parts", %upload_id))
            .await
            .map_err(|err| {
                if err.is_transient() {
                    err
                } else {
                    err.into_kind(ErrorKind::IncompleteUpload)
                }
            })?;

        validate_resume(&recorded, &remote, part_size, source_len)?;
        tracing::debug!(
            "resuming upload {upload_id} of {object} after {} acknowledged parts",
            remote.len()
        );

        let state = if remote.is_empty() {
            SessionState::Initiated
        } else {
            SessionState::InProgress
        };

        Ok(UploadSession {
            backend,
            object,
            source,
            source_len,
            part_size,
            upload_id,
            parts: remote,
            state,
            token: CancellationToken::new(),
            failed_upload_policy: FailedMultipartUploadPolicy::default(),
            remote_aborted: false,
        })
    }

    /// Use `token` to cancel in-flight requests of this session.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// What to do with the remote upload when the session fails. Default is to abort it.
    pub fn set_failed_upload_policy(&mut self, policy: FailedMultipartUploadPolicy) {
        self.failed_upload_policy = policy;
    }

    /// Send the next part.
    ///
    /// Returns `true` once the whole source has been acknowledged. An empty source is sent
    /// as a single empty part.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::BackendUnavailable`]: transient, nothing was recorded and the same part
    ///   is sent again on the next call
    /// - [`ErrorKind::OperationCancelled`]: nothing was recorded
    /// - [`ErrorKind::FatalUpload`]: the session is now aborted
    pub async fn upload_next(&mut self) -> Result<bool, Error> {
        self.ensure_active()?;
        if self.is_exhausted() {
            return Ok(true);
        }

        let part_number = self.parts.len() as u64 + 1;
        let offset = self.bytes_acknowledged();
        if self.token.is_cancelled() {
            return Err(error::operation_cancelled().at(self.failure_point(part_number)));
        }

        let content = match self.source.read_part(offset, self.part_size).await {
            Ok(content) => content,
            Err(err) => return Err(self.fail(err, part_number).await),
        };
        let size = content.len() as u64;

        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                return Err(error::operation_cancelled().at(self.failure_point(part_number)));
            }
            result = self
                .backend
                .upload_part(&self.object, &self.upload_id, part_number, content)
                .instrument(tracing::debug_span!("send-upload-part", part_number)) => result,
        };

        match result {
            Ok(e_tag) => {
                tracing::trace!("completed upload of part number {part_number} with size {size}");
                self.parts.push(CompletedPart {
                    part_number,
                    e_tag,
                    size,
                });
                self.state = SessionState::InProgress;
                Ok(self.is_exhausted())
            }
            Err(err) if err.is_transient() => Err(err.at(self.failure_point(part_number))),
            Err(err) => Err(self.fail(err, part_number).await),
        }
    }

    /// Assemble the acknowledged parts into the final object.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::IncompleteUpload`]: the acknowledged parts do not cover the source, the
    ///   session is unchanged
    /// - [`ErrorKind::BackendUnavailable`]: transient, `complete` may be called again
    /// - [`ErrorKind::FatalUpload`]: the session is now aborted
    pub async fn complete(&mut self) -> Result<UploadOutput, Error> {
        self.ensure_active()?;
        let part_number = self.parts.len() as u64;
        if !self.is_exhausted() {
            return Err(Error::new(
                ErrorKind::IncompleteUpload,
                format!(
                    "{} of {} bytes acknowledged in {} parts",
                    self.bytes_acknowledged(),
                    self.source_len,
                    self.parts.len()
                ),
            )
            .at(self.failure_point(part_number + 1)));
        }
        if self.token.is_cancelled() {
            return Err(error::operation_cancelled().at(self.failure_point(part_number)));
        }

        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                return Err(error::operation_cancelled().at(self.failure_point(part_number)));
            }
            result = self
                .backend
                .complete_multipart_upload(&self.object, &self.upload_id, &self.parts)
                .instrument(tracing::debug_span!("send-complete-multipart-upload")) => result,
        };

        match result {
            Ok(completed) => {
                self.state = SessionState::Completed;
                tracing::trace!("upload completed successfully");
                Ok(UploadOutput {
                    object: self.object.clone(),
                    upload_id: self.upload_id.clone(),
                    e_tag: completed.e_tag,
                    version_id: completed.version_id,
                    parts: self.parts.clone(),
                    size: self.source_len,
                })
            }
            Err(err) if err.is_transient() => Err(err.at(self.failure_point(part_number))),
            Err(err) => Err(self.fail(err, part_number).await),
        }
    }

    /// Abort the remote multipart upload and move the session to [`SessionState::Aborted`].
    ///
    /// Calling this on an already aborted session is a no-op.
    pub async fn abort(&mut self) -> Result<(), Error> {
        match self.state {
            SessionState::Completed => {
                return Err(Error::new(
                    ErrorKind::FatalUpload,
                    "a completed upload cannot be aborted",
                ))
            }
            _ if self.remote_aborted => return Ok(()),
            _ => {}
        }

        self.backend
            .abort_multipart_upload(&self.object, &self.upload_id)
            .instrument(tracing::debug_span!("send-abort-multipart-upload"))
            .await?;
        self.remote_aborted = true;
        self.state = SessionState::Aborted;
        Ok(())
    }

    /// Capture the state needed to resume this upload, possibly in another process.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            object: self.object.clone(),
            upload_id: self.upload_id.clone(),
            part_size: self.part_size,
            parts: self.parts.clone(),
        }
    }

    /// The object being uploaded
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// The multipart upload ID
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Acknowledged parts, ordered by part number
    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    /// Size of every part but the last
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Total length of the source
    pub fn source_len(&self) -> u64 {
        self.source_len
    }

    /// Bytes the backend has acknowledged so far
    pub fn bytes_acknowledged(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }

    /// The token cancelling this session's requests
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn failed_upload_policy(&self) -> FailedMultipartUploadPolicy {
        self.failed_upload_policy
    }

    pub(crate) fn failure_point(&self, part_number: u64) -> FailurePoint {
        FailurePoint::Part {
            upload_id: self.upload_id.clone(),
            part_number,
            bytes_acknowledged: self.bytes_acknowledged(),
        }
    }

    /// The part that would be sent next
    pub(crate) fn next_part_number(&self) -> u64 {
        self.parts.len() as u64 + 1
    }

    fn is_exhausted(&self) -> bool {
        !self.parts.is_empty() && self.bytes_acknowledged() >= self.source_len
    }

    fn ensure_active(&self) -> Result<(), Error> {
        if self.state.is_terminal() {
            return Err(Error::new(
                ErrorKind::FatalUpload,
                format!("upload session is {:?}", self.state),
            )
            .at(self.failure_point(self.next_part_number())));
        }
        Ok(())
    }

    /// Terminate the session after a non-transient failure.
    async fn fail(&mut self, err: Error, part_number: u64) -> Error {
        tracing::error!(
            "multipart upload {} failed at part {part_number}: {}",
            self.upload_id,
            DisplayErrorContext(&err)
        );
        self.state = SessionState::Aborted;
        if self.failed_upload_policy == FailedMultipartUploadPolicy::AbortUpload {
            self.abort_best_effort().await;
        }
        err.into_kind(ErrorKind::FatalUpload)
            .at(self.failure_point(part_number))
    }

    /// Abort the remote upload, logging instead of returning failures.
    async fn abort_best_effort(&mut self) {
        if let Err(err) = self.abort().await {
            tracing::error!(
                "failed to abort upload {}: {}",
                self.upload_id,
                DisplayErrorContext(err)
            );
        }
    }
}

fn validate_part_count(source_len: u64, part_size: u64) -> Result<(), Error> {
    if part_size == 0 {
        return Err(error::invalid_input("part size must be greater than zero"));
    }
    let parts = source_len.div_ceil(part_size).max(1);
    if parts > MAX_PARTS {
        return Err(error::invalid_input(format!(
            "{source_len} bytes in parts of {part_size} bytes needs {parts} parts, at most {MAX_PARTS} are allowed"
        )));
    }
    Ok(())
}

fn validate_resume(
    recorded: &[CompletedPart],
    remote: &[CompletedPart],
    part_size: u64,
    source_len: u64,
) -> Result<(), Error> {
    let incomplete = |msg: String| Error::new(ErrorKind::IncompleteUpload, msg);

    for (i, part) in remote.iter().enumerate() {
        let expected = i as u64 + 1;
        if part.part_number != expected {
            return Err(incomplete(format!(
                "missing part {expected}, found part {}",
                part.part_number
            )));
        }
    }

    for part in recorded {
        let matching = remote
            .get((part.part_number as usize).wrapping_sub(1))
            .filter(|r| r.e_tag == part.e_tag);
        if matching.is_none() {
            return Err(incomplete(format!(
                "part {} is not acknowledged by the backend with entity tag {}",
                part.part_number, part.e_tag
            )));
        }
    }

    let acknowledged: u64 = remote.iter().map(|p| p.size).sum();
    if acknowledged > source_len {
        return Err(incomplete(format!(
            "{acknowledged} bytes acknowledged for a source of {source_len} bytes"
        )));
    }
    // every part but the one ending the source must be full
    let final_part_short = acknowledged == source_len;
    for (i, part) in remote.iter().enumerate() {
        let is_last = i + 1 == remote.len();
        let full = part.size == part_size;
        if !full && !(is_last && final_part_short && part.size < part_size) {
            return Err(incomplete(format!(
                "part {} has {} bytes, expected {part_size}",
                part.part_number, part.size
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::UploadSession;
    use crate::backend::in_memory::InMemoryBackend;
    use crate::backend::StorageBackend;
    use crate::error::{ErrorKind, FailurePoint};
    use crate::io::InputStream;
    use crate::types::{ObjectRef, SessionState};

    fn object() -> ObjectRef {
        ObjectRef::new("test-bucket", "videos/clip.mp4").unwrap()
    }

    #[tokio::test]
    async fn test_upload_in_parts() {
        let backend = Arc::new(InMemoryBackend::new());
        let body = Bytes::from_static(b"every adolescent dog goes bonkers early");
        let mut session = UploadSession::begin(
            backend.clone(),
            object(),
            InputStream::from(body.clone()),
            30,
        )
        .await
        .unwrap();
        assert_eq!(SessionState::Initiated, session.state());

        assert!(!session.upload_next().await.unwrap());
        assert_eq!(SessionState::InProgress, session.state());
        assert!(session.upload_next().await.unwrap());
        // exhausted sessions don't send more parts
        assert!(session.upload_next().await.unwrap());

        let sizes: Vec<_> = session.parts().iter().map(|p| p.size).collect();
        assert_eq!(vec![30, 9], sizes);

        let output = session.complete().await.unwrap();
        assert_eq!(SessionState::Completed, session.state());
        assert_eq!(39, output.size);
        assert_eq!(Some(body), backend.object_data(&object()).await);
    }

    #[tokio::test]
    async fn test_empty_source_sends_one_part() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut session =
            UploadSession::begin(backend.clone(), object(), InputStream::default(), 30)
                .await
                .unwrap();

        assert!(session.upload_next().await.unwrap());
        assert_eq!(1, session.parts().len());
        assert_eq!(0, session.parts()[0].size);
        session.complete().await.unwrap();
        assert_eq!(Some(Bytes::new()), backend.object_data(&object()).await);
    }

    #[tokio::test]
    async fn test_begin_validates_part_size() {
        let backend = Arc::new(InMemoryBackend::new());
        let err = UploadSession::begin(backend.clone(), object(), InputStream::from_static(b"abc"), 0)
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());

        let source = InputStream::from(vec![0u8; 10_001]);
        let err = UploadSession::begin(backend.clone(), object(), source, 1)
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
        assert_eq!(0, backend.pending_uploads().await);
    }

    #[tokio::test]
    async fn test_complete_incomplete_upload() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut session =
            UploadSession::begin(backend, object(), InputStream::from_static(b"0123456789"), 5)
                .await
                .unwrap();

        let err = session.complete().await.unwrap_err();
        assert_eq!(&ErrorKind::IncompleteUpload, err.kind());

        session.upload_next().await.unwrap();
        let err = session.complete().await.unwrap_err();
        assert_eq!(&ErrorKind::IncompleteUpload, err.kind());
        assert!(matches!(
            err.failure_point(),
            Some(FailurePoint::Part {
                part_number: 2,
                bytes_acknowledged: 5,
                ..
            })
        ));
        // not terminal, the upload can continue
        assert_eq!(SessionState::InProgress, session.state());
        assert!(session.upload_next().await.unwrap());
        session.complete().await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_session() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut session = UploadSession::begin(
            backend.clone(),
            object(),
            InputStream::from_static(b"0123456789"),
            5,
        )
        .await
        .unwrap();

        // the backend forgets the upload
        backend
            .abort_multipart_upload(&object(), session.upload_id())
            .await
            .unwrap();

        let err = session.upload_next().await.unwrap_err();
        assert_eq!(&ErrorKind::FatalUpload, err.kind());
        assert_eq!(SessionState::Aborted, session.state());
        assert!(session.parts().is_empty());

        let err = session.upload_next().await.unwrap_err();
        assert_eq!(&ErrorKind::FatalUpload, err.kind());
    }

    #[tokio::test]
    async fn test_abort_idempotent() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut session = UploadSession::begin(
            backend.clone(),
            object(),
            InputStream::from_static(b"0123456789"),
            5,
        )
        .await
        .unwrap();
        session.upload_next().await.unwrap();

        session.abort().await.unwrap();
        assert_eq!(SessionState::Aborted, session.state());
        assert_eq!(0, backend.pending_uploads().await);
        session.abort().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_upload_next_records_nothing() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut session = UploadSession::begin(
            backend.clone(),
            object(),
            InputStream::from_static(b"0123456789"),
            5,
        )
        .await
        .unwrap();
        let token = session.cancellation_token().clone();
        token.cancel();

        let err = session.upload_next().await.unwrap_err();
        assert_eq!(&ErrorKind::OperationCancelled, err.kind());
        assert_eq!(SessionState::Initiated, session.state());
        assert!(session.parts().is_empty());
        assert!(backend
            .list_parts(&object(), session.upload_id())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_resume_continues_after_acknowledged_parts() {
        let backend = Arc::new(InMemoryBackend::new());
        let body = Bytes::from_static(b"0123456789abcdefghij");
        let mut session =
            UploadSession::begin(backend.clone(), object(), InputStream::from(body.clone()), 8)
                .await
                .unwrap();
        session.upload_next().await.unwrap();
        let snapshot = session.snapshot();
        drop(session);

        let mut session =
            UploadSession::resume(backend.clone(), snapshot, InputStream::from(body.clone()))
                .await
                .unwrap();
        assert_eq!(SessionState::InProgress, session.state());
        assert_eq!(8, session.bytes_acknowledged());

        while !session.upload_next().await.unwrap() {}
        let output = session.complete().await.unwrap();
        let part_numbers: Vec<_> = output.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(vec![1, 2, 3], part_numbers);
        assert_eq!(Some(body), backend.object_data(&object()).await);
    }

    #[tokio::test]
    async fn test_resume_rejects_e_tag_mismatch() {
        let backend = Arc::new(InMemoryBackend::new());
        let body = Bytes::from_static(b"0123456789abcdefghij");
        let mut session =
            UploadSession::begin(backend.clone(), object(), InputStream::from(body.clone()), 8)
                .await
                .unwrap();
        session.upload_next().await.unwrap();
        let mut snapshot = session.snapshot();
        snapshot.parts[0].e_tag = "\"stale\"".to_owned();

        let err = UploadSession::resume(backend, snapshot, InputStream::from(body))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::IncompleteUpload, err.kind());
    }

    #[tokio::test]
    async fn test_resume_rejects_gaps_and_short_parts() {
        let backend = Arc::new(InMemoryBackend::new());
        let body = Bytes::from_static(b"0123456789abcdefghij");
        let session =
            UploadSession::begin(backend.clone(), object(), InputStream::from(body.clone()), 8)
                .await
                .unwrap();
        let snapshot = session.snapshot();

        // part 2 without part 1
        backend
            .upload_part(&object(), session.upload_id(), 2, body.slice(8..16))
            .await
            .unwrap();
        let err = UploadSession::resume(backend.clone(), snapshot.clone(), InputStream::from(body.clone()))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::IncompleteUpload, err.kind());

        // a short part 1 in front of part 2
        backend
            .upload_part(&object(), session.upload_id(), 1, body.slice(0..4))
            .await
            .unwrap();
        let err = UploadSession::resume(backend.clone(), snapshot.clone(), InputStream::from(body))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::IncompleteUpload, err.kind());

        // unknown upload
        let mut snapshot = snapshot;
        snapshot.upload_id = "nope".to_owned();
        let err = UploadSession::resume(backend, snapshot, InputStream::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::IncompleteUpload, err.kind());
    }
}
