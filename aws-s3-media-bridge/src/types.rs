/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error;

/// Identifies a remote object: a key within a bucket.
///
/// Both parts are validated to be non-empty at construction and the value is immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ObjectRefFields")]
pub struct ObjectRef {
    bucket: String,
    key: String,
}

/// Unvalidated wire form of [`ObjectRef`]
#[derive(Deserialize)]
struct ObjectRefFields {
    bucket: String,
    key: String,
}

impl TryFrom<ObjectRefFields> for ObjectRef {
    type Error = error::Error;

    fn try_from(fields: ObjectRefFields) -> Result<Self, Self::Error> {
        ObjectRef::new(fields.bucket, fields.key)
    }
}

impl ObjectRef {
    /// Create a new object reference
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self, error::Error> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() {
            return Err(error::invalid_input("bucket name must not be empty"));
        }
        if key.is_empty() {
            return Err(error::invalid_input("object key must not be empty"));
        }
        Ok(Self { bucket, key })
    }

    /// The bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object key
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// The target part size for an upload request.
#[derive(Debug, Clone, Default)]
pub enum PartSize {
    /// Automatically configure an optimal target part size.
    #[default]
    Auto,

    /// Target part size explicitly given.
    ///
    /// NOTE: This is a suggestion and will be used if possible but may be adjusted for an individual request
    /// as required by the underlying API.
    Target(u64),
}

/// Lifecycle of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// The multipart upload was created, no part has been acknowledged yet
    Initiated,
    /// At least one part was acknowledged
    InProgress,
    /// The multipart upload was completed
    Completed,
    /// The session hit a fatal error or was explicitly aborted
    Aborted,
}

impl SessionState {
    /// True once the session can no longer send parts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

/// A part acknowledged by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-indexed part number
    pub part_number: u64,
    /// The entity tag the backend returned for this part
    pub e_tag: String,
    /// Number of bytes in this part
    pub size: u64,
}

/// Policy for how to handle a failed multipart upload
///
/// Default is to abort the upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailedMultipartUploadPolicy {
    /// Abort the upload on any individual part failure
    #[default]
    AbortUpload,
    /// Retain any uploaded parts so the upload can be resumed later.
    Retain,
}

/// Bounds on how transient backend failures are retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Never retry
    pub fn disabled() -> Self {
        Self::default().with_max_attempts(0)
    }

    /// Maximum number of retries for a single request (not counting the first attempt)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the first retry. Doubles on every following retry.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Upper bound on the delay between retries
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Maximum number of retries for a single request
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Upper bound on the delay between retries
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }
}

/// Metadata about an object, returned by `HeadObject`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    /// Object size in bytes, when reported
    pub content_length: Option<u64>,
    /// Content type, when reported
    pub content_type: Option<String>,
    /// Entity tag, when reported
    pub e_tag: Option<String>,
}

/// A single entry of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Entity tag, when reported
    pub e_tag: Option<String>,
    /// Last modification time, when reported
    pub last_modified: Option<SystemTime>,
}

/// Parameters of a single listing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsRequest {
    /// Only keys starting with this prefix
    pub prefix: Option<String>,
    /// Only keys sorting strictly after this key
    pub start_after: Option<String>,
    /// Maximum number of keys to return (1..=1000)
    pub limit: u32,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsPage {
    /// Objects in key order
    pub objects: Vec<ObjectSummary>,
    /// True if more keys match than were returned
    pub is_truncated: bool,
}

impl ListObjectsPage {
    /// The `start_after` value for the following page, if there is one.
    pub fn next_start_after(&self) -> Option<&str> {
        if !self.is_truncated {
            return None;
        }
        self.objects.last().map(|o| o.key.as_str())
    }
}

/// A whole object read into memory
#[derive(Debug, Clone)]
pub struct ObjectData {
    /// Content type, when reported
    pub content_type: Option<String>,
    /// Object contents
    pub body: bytes::Bytes,
}

#[cfg(test)]
mod test {
    use super::{ListObjectsPage, ObjectRef, ObjectSummary};
    use crate::error::ErrorKind;

    #[test]
    fn test_object_ref_requires_key() {
        let err = ObjectRef::new("bucket", "").unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
        let err = ObjectRef::new("", "key").unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());

        let object = ObjectRef::new("bucket", "videos/movie.mp4").unwrap();
        assert_eq!("s3://bucket/videos/movie.mp4", object.to_string());
    }

    #[test]
    fn test_deserialize_object_ref_validates() {
        let object: ObjectRef =
            serde_json::from_str(r#"{"bucket":"b","key":"videos/movie.mp4"}"#).unwrap();
        assert_eq!("videos/movie.mp4", object.key());
        assert_eq!(
            object,
            serde_json::from_str(&serde_json::to_string(&object).unwrap()).unwrap()
        );

        let err = serde_json::from_str::<ObjectRef>(r#"{"bucket":"b","key":""}"#).unwrap_err();
        assert!(err.to_string().contains("invalid input"));
        assert!(serde_json::from_str::<ObjectRef>(r#"{"bucket":"","key":"k"}"#).is_err());
    }

    #[test]
    fn test_next_start_after() {
        let summary = |key: &str| ObjectSummary {
            key: key.to_owned(),
            size: 1,
            e_tag: None,
            last_modified: None,
        };
        let mut page = ListObjectsPage {
            objects: vec![summary("a"), summary("b")],
            is_truncated: true,
        };
        assert_eq!(Some("b"), page.next_start_after());
        page.is_truncated = false;
        assert_eq!(None, page.next_start_after());
    }
}
