/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
//! Storage backends.
//!
//! This module provides the `StorageBackend` trait and its implementations. The upload
//! session manager and the streaming read bridge depend only on this trait, never on a
//! particular SDK.

use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;
use crate::types::{CompletedPart, ListObjectsPage, ListObjectsRequest, ObjectHead, ObjectRef};

/// In-memory backend
pub mod in_memory;

/// Amazon S3 backend
pub mod s3;

/// Result of completing a multipart upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedObject {
    /// Entity tag of the assembled object
    pub e_tag: Option<String>,
    /// Version ID, if the bucket is versioned
    pub version_id: Option<String>,
}

/// The object-storage operations the rest of this crate is built on.
///
/// # Errors
///
/// Implementations must classify failures so callers can decide whether to retry:
/// - [`ErrorKind::BackendUnavailable`](crate::error::ErrorKind::BackendUnavailable) for
///   timeouts, connection failures and throttling (transient)
/// - [`ErrorKind::ObjectNotFound`](crate::error::ErrorKind::ObjectNotFound) when the object
///   does not exist
/// - [`ErrorKind::BackendRejected`](crate::error::ErrorKind::BackendRejected) for everything
///   that will not succeed on retry (authorization, unknown upload IDs, invalid parts)
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// List objects of `bucket` in key order.
    async fn list_objects(
        &self,
        bucket: &str,
        request: ListObjectsRequest,
    ) -> Result<ListObjectsPage, Error>;

    /// Get object metadata without fetching the data.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head_object(&self, object: &ObjectRef) -> Result<Option<ObjectHead>, Error>;

    /// Fetch the bytes in `range` (end exclusive).
    ///
    /// A range extending past the end of the object is truncated to the object size, a range
    /// starting at or after the end yields no bytes.
    async fn get_object_range(&self, object: &ObjectRef, range: Range<u64>) -> Result<Bytes, Error>;

    /// Delete an object.
    async fn delete_object(&self, object: &ObjectRef) -> Result<(), Error>;

    /// Create a new multipart upload and return its upload ID.
    async fn create_multipart_upload(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
    ) -> Result<String, Error>;

    /// Upload a part for a multipart upload and return its entity tag.
    async fn upload_part(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        part_number: u64,
        content: Bytes,
    ) -> Result<String, Error>;

    /// List all parts the backend has acknowledged for a multipart upload, ordered by part
    /// number.
    async fn list_parts(&self, object: &ObjectRef, upload_id: &str)
        -> Result<Vec<CompletedPart>, Error>;

    /// Complete a multipart upload by combining the given parts, in order, into the final object.
    async fn complete_multipart_upload(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedObject, Error>;

    /// Abort a multipart upload and clean up all associated data.
    async fn abort_multipart_upload(&self, object: &ObjectRef, upload_id: &str) -> Result<(), Error>;
}

// Implement the trait for Arc<dyn StorageBackend> to allow for dynamic dispatch
#[async_trait]
impl StorageBackend for Arc<dyn StorageBackend + '_> {
    async fn list_objects(
        &self,
        bucket: &str,
        request: ListObjectsRequest,
    ) -> Result<ListObjectsPage, Error> {
        (**self).list_objects(bucket, request).await
    }

    async fn head_object(&self, object: &ObjectRef) -> Result<Option<ObjectHead>, Error> {
        (**self).head_object(object).await
    }

    async fn get_object_range(&self, object: &ObjectRef, range: Range<u64>) -> Result<Bytes, Error> {
        (**self).get_object_range(object, range).await
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), Error> {
        (**self).delete_object(object).await
    }

    async fn create_multipart_upload(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
    ) -> Result<String, Error> {
        (**self).create_multipart_upload(object, content_type).await
    }

    async fn upload_part(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        part_number: u64,
        content: Bytes,
    ) -> Result<String, Error> {
        (**self)
            .upload_part(object, upload_id, part_number, content)
            .await
    }

    async fn list_parts(
        &self,
        object: &ObjectRef,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, Error> {
        (**self).list_parts(object, upload_id).await
    }

    async fn complete_multipart_upload(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedObject, Error> {
        (**self)
            .complete_multipart_upload(object, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(&self, object: &ObjectRef, upload_id: &str) -> Result<(), Error> {
        (**self).abort_multipart_upload(object, upload_id).await
    }
}
