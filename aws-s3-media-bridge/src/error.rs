/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::error::SdkError;

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// NOTE: Use [`aws_smithy_types::error::display::DisplayErrorContext`] or similar to display
/// the entire error cause/source chain.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
    failure_point: Option<FailurePoint>,
}

/// General categories of errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operation input validation issues
    InputInvalid,

    /// Local I/O errors (e.g. reading the upload source)
    IOError,

    /// Some kind of internal runtime issue (e.g. task failure, poisoned mutex, etc)
    RuntimeError,

    /// The backend could not be reached or asked us to slow down. Retrying the same
    /// request unchanged is expected to eventually succeed.
    BackendUnavailable,

    /// The backend refused the request (bad credentials, unknown upload ID, malformed
    /// request). Retrying unchanged will not help.
    BackendRejected,

    /// The object does not exist
    ObjectNotFound,

    /// `seek` was called on a cursor opened without seek support
    NotSeekable,

    /// A cursor was used after being closed
    UseAfterClose,

    /// The upload session hit a non-transient failure and is no longer usable.
    FatalUpload,

    /// The parts acknowledged by the backend do not describe the whole source.
    IncompleteUpload,

    /// The operation was cancelled through its cancellation token or handle.
    OperationCancelled,
}

/// Where an operation stopped when it failed.
///
/// Enough state for a caller to decide whether (and from where) to resume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailurePoint {
    /// A multipart upload failed while sending (or completing) a part.
    Part {
        /// The multipart upload ID
        upload_id: String,
        /// The 1-indexed part number that was being sent
        part_number: u64,
        /// Bytes acknowledged by the backend before the failure
        bytes_acknowledged: u64,
    },
    /// A streaming read failed at the given cursor position.
    Cursor {
        /// Cursor position (unchanged by the failed read)
        position: u64,
    },
}

impl Error {
    /// Creates a new [`Error`] from a known kind of error as well as an arbitrary error
    /// source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: err.into(),
            failure_point: None,
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Where the failed operation stopped, if known.
    pub fn failure_point(&self) -> Option<&FailurePoint> {
        self.failure_point.as_ref()
    }

    /// True if retrying the same request unchanged may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::BackendUnavailable
    }

    pub(crate) fn at(mut self, point: FailurePoint) -> Self {
        self.failure_point = Some(point);
        self
    }

    /// Re-categorize this error, keeping it as the source of the new one.
    pub(crate) fn into_kind(self, kind: ErrorKind) -> Error {
        let failure_point = self.failure_point.clone();
        Error {
            kind,
            source: Box::new(self),
            failure_point,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InputInvalid => write!(f, "invalid input")?,
            ErrorKind::IOError => write!(f, "I/O error")?,
            ErrorKind::RuntimeError => write!(f, "runtime error")?,
            ErrorKind::BackendUnavailable => write!(f, "storage backend unavailable")?,
            ErrorKind::BackendRejected => write!(f, "storage backend rejected the request")?,
            ErrorKind::ObjectNotFound => write!(f, "object not found")?,
            ErrorKind::NotSeekable => write!(f, "stream is not seekable")?,
            ErrorKind::UseAfterClose => write!(f, "stream used after close")?,
            ErrorKind::FatalUpload => write!(f, "upload failed")?,
            ErrorKind::IncompleteUpload => write!(f, "upload is incomplete")?,
            ErrorKind::OperationCancelled => write!(f, "operation cancelled")?,
        }
        match &self.failure_point {
            Some(FailurePoint::Part {
                upload_id,
                part_number,
                ..
            }) => write!(f, " (upload {upload_id}, part {part_number})"),
            Some(FailurePoint::Cursor { position }) => write!(f, " (at position {position})"),
            None => Ok(()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::IOError, value)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

impl From<aws_smithy_types::byte_stream::error::Error> for Error {
    fn from(value: aws_smithy_types::byte_stream::error::Error) -> Self {
        // the connection dropped while the body was streaming
        Self::new(ErrorKind::BackendUnavailable, value)
    }
}

impl<E, R> From<SdkError<E, R>> for Error
where
    E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
    R: Send + Sync + fmt::Debug + 'static,
    R: HttpStatus,
{
    fn from(value: SdkError<E, R>) -> Self {
        let kind = match &value {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                ErrorKind::BackendUnavailable
            }
            SdkError::ServiceError(service_err) => {
                classify_service_error(value.code(), service_err.raw().http_status())
            }
            _ => ErrorKind::BackendRejected,
        };

        Error::new(kind, value)
    }
}

/// Access to the HTTP status of a raw SDK response.
pub(crate) trait HttpStatus {
    fn http_status(&self) -> u16;
}

impl HttpStatus for aws_smithy_runtime_api::http::Response {
    fn http_status(&self) -> u16 {
        self.status().as_u16()
    }
}

/// Map an S3 error code and HTTP status to an [`ErrorKind`].
pub(crate) fn classify_service_error(code: Option<&str>, status: u16) -> ErrorKind {
    match code {
        Some("NotFound" | "NoSuchKey" | "NoSuchBucket") => ErrorKind::ObjectNotFound,
        Some(
            "SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable" | "Throttling"
            | "ThrottlingException" | "RequestTimeTooSkewed",
        ) => ErrorKind::BackendUnavailable,
        _ if status == 429 || status >= 500 => ErrorKind::BackendUnavailable,
        None if status == 404 => ErrorKind::ObjectNotFound,
        _ => ErrorKind::BackendRejected,
    }
}

pub(crate) fn invalid_input<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InputInvalid, err)
}

pub(crate) fn object_not_found(key: &str) -> Error {
    Error::new(ErrorKind::ObjectNotFound, format!("no object found for key `{key}`"))
}

pub(crate) fn use_after_close() -> Error {
    Error::new(ErrorKind::UseAfterClose, "cursor has been closed")
}

static CANCELLATION_ERROR: &str = "operation was cancelled before the request completed";

pub(crate) fn operation_cancelled() -> Error {
    Error::new(ErrorKind::OperationCancelled, CANCELLATION_ERROR)
}
