/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! In-memory implementation of the StorageBackend trait.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::RwLock;

use super::{CompletedObject, StorageBackend};
use crate::error::{self, Error, ErrorKind};
use crate::types::{
    CompletedPart, ListObjectsPage, ListObjectsRequest, ObjectHead, ObjectRef, ObjectSummary,
};

/// An in-memory implementation of the [`StorageBackend`] trait.
///
/// This implementation stores all objects and multipart uploads in memory,
/// making it suitable for testing and local development.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    // (bucket, key) -> object
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
    // upload-id -> pending upload
    uploads: RwLock<HashMap<String, PendingUpload>>,
    next_upload_id: AtomicU64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    content: Bytes,
    content_type: Option<String>,
    e_tag: String,
}

#[derive(Debug)]
struct PendingUpload {
    object: ObjectRef,
    content_type: Option<String>,
    // part# -> (etag, content)
    parts: BTreeMap<u64, (String, Bytes)>,
}

impl InMemoryBackend {
    /// Create a new, empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing the multipart upload path.
    pub async fn put_object(
        &self,
        object: &ObjectRef,
        content: impl Into<Bytes>,
        content_type: Option<&str>,
    ) {
        let content = content.into();
        let stored = StoredObject {
            e_tag: e_tag_of(&content),
            content,
            content_type: content_type.map(str::to_owned),
        };
        let mut objects = self.objects.write().await;
        objects.insert(map_key(object), stored);
    }

    /// The full contents of an object, if it exists.
    pub async fn object_data(&self, object: &ObjectRef) -> Option<Bytes> {
        let objects = self.objects.read().await;
        objects.get(&map_key(object)).map(|o| o.content.clone())
    }

    /// Number of multipart uploads that are neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.uploads.read().await.len()
    }
}

fn map_key(object: &ObjectRef) -> (String, String) {
    (object.bucket().to_owned(), object.key().to_owned())
}

fn e_tag_of(content: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(content))
}

/// S3 style entity tag of a multipart object: the MD5 of the concatenated part digests,
/// suffixed with the part count.
fn multipart_e_tag<'a>(parts: impl ExactSizeIterator<Item = &'a [u8]>) -> String {
    let count = parts.len();
    let mut digests = md5::Context::new();
    for content in parts {
        digests.consume(md5::compute(content).0);
    }
    format!("\"{:x}-{count}\"", digests.compute())
}

fn no_such_upload(upload_id: &str) -> Error {
    Error::new(
        ErrorKind::BackendRejected,
        format!("no such upload: {upload_id}"),
    )
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn list_objects(
        &self,
        bucket: &str,
        request: ListObjectsRequest,
    ) -> Result<ListObjectsPage, Error> {
        let objects = self.objects.read().await;
        let prefix = request.prefix.as_deref().unwrap_or_default();
        let start_after = request.start_after.as_deref().unwrap_or_default();
        let mut matching = objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix) && k.as_str() > start_after)
            .map(|((_, key), object)| ObjectSummary {
                key: key.clone(),
                size: object.content.len() as u64,
                e_tag: Some(object.e_tag.clone()),
                last_modified: None,
            });

        let limit = request.limit as usize;
        let page: Vec<_> = matching.by_ref().take(limit).collect();
        let is_truncated = matching.next().is_some();
        Ok(ListObjectsPage {
            objects: page,
            is_truncated,
        })
    }

    async fn head_object(&self, object: &ObjectRef) -> Result<Option<ObjectHead>, Error> {
        let objects = self.objects.read().await;
        Ok(objects.get(&map_key(object)).map(|o| ObjectHead {
            content_length: Some(o.content.len() as u64),
            content_type: o.content_type.clone(),
            e_tag: Some(o.e_tag.clone()),
        }))
    }

    async fn get_object_range(&self, object: &ObjectRef, range: Range<u64>) -> Result<Bytes, Error> {
        let objects = self.objects.read().await;
        let data = &objects
            .get(&map_key(object))
            .ok_or_else(|| error::object_not_found(object.key()))?
            .content;

        let len = data.len() as u64;
        let start = range.start.min(len) as usize;
        let end = range.end.min(len) as usize;
        if start >= end {
            return Ok(Bytes::new());
        }
        Ok(data.slice(start..end))
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), Error> {
        let mut objects = self.objects.write().await;
        // S3 semantics: deleting a missing key succeeds
        objects.remove(&map_key(object));
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
    ) -> Result<String, Error> {
        let id = self.next_upload_id.fetch_add(1, Ordering::Relaxed) + 1;
        let upload_id = format!("upload-{id:08}");
        let mut uploads = self.uploads.write().await;
        uploads.insert(
            upload_id.clone(),
            PendingUpload {
                object: object.clone(),
                content_type: content_type.map(str::to_owned),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        part_number: u64,
        content: Bytes,
    ) -> Result<String, Error> {
        if part_number == 0 {
            return Err(Error::new(
                ErrorKind::BackendRejected,
                "part numbers start at 1",
            ));
        }
        let mut uploads = self.uploads.write().await;
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| &u.object == object)
            .ok_or_else(|| no_such_upload(upload_id))?;
        let e_tag = e_tag_of(&content);
        upload.parts.insert(part_number, (e_tag.clone(), content));
        Ok(e_tag)
    }

    async fn list_parts(
        &self,
        object: &ObjectRef,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, Error> {
        let uploads = self.uploads.read().await;
        let upload = uploads
            .get(upload_id)
            .filter(|u| &u.object == object)
            .ok_or_else(|| no_such_upload(upload_id))?;
        Ok(upload
            .parts
            .iter()
            .map(|(part_number, (e_tag, content))| CompletedPart {
                part_number: *part_number,
                e_tag: e_tag.clone(),
                size: content.len() as u64,
            })
            .collect())
    }

    async fn complete_multipart_upload(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedObject, Error> {
        let mut uploads = self.uploads.write().await;
        let upload = uploads
            .get(upload_id)
            .filter(|u| &u.object == object)
            .ok_or_else(|| no_such_upload(upload_id))?;

        if parts.is_empty() {
            return Err(Error::new(
                ErrorKind::BackendRejected,
                "at least one part is required",
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(Error::new(ErrorKind::BackendRejected, "invalid part order"));
        }

        // Combine all parts in the specified order
        let mut combined = BytesMut::new();
        let mut contents = Vec::with_capacity(parts.len());
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((e_tag, content)) if *e_tag == part.e_tag => {
                    combined.extend_from_slice(content);
                    contents.push(content.clone());
                }
                _ => {
                    return Err(Error::new(
                        ErrorKind::BackendRejected,
                        format!("invalid part {}", part.part_number),
                    ))
                }
            }
        }

        let upload = uploads
            .remove(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;
        let content = combined.freeze();
        let e_tag = multipart_e_tag(contents.iter().map(|c| &c[..]));
        let stored = StoredObject {
            content,
            content_type: upload.content_type,
            e_tag: e_tag.clone(),
        };

        // Store the combined object under the upload's key
        let mut objects = self.objects.write().await;
        objects.insert(map_key(object), stored);

        Ok(CompletedObject {
            e_tag: Some(e_tag),
            version_id: None,
        })
    }

    async fn abort_multipart_upload(&self, object: &ObjectRef, upload_id: &str) -> Result<(), Error> {
        let mut uploads = self.uploads.write().await;
        match uploads.get(upload_id) {
            Some(upload) if &upload.object == object => {
                uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(no_such_upload(upload_id)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn object(key: &str) -> ObjectRef {
        ObjectRef::new("test-bucket", key).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_range() {
        let backend = InMemoryBackend::new();
        let key = object("test-key");
        backend.put_object(&key, "test content", None).await;

        let retrieved = backend.get_object_range(&key, 0..4).await.unwrap();
        assert_eq!(Bytes::from("test"), retrieved);

        // truncated to the object size
        let retrieved = backend.get_object_range(&key, 5..100).await.unwrap();
        assert_eq!(Bytes::from("content"), retrieved);

        // past the end is empty, not an error
        let retrieved = backend.get_object_range(&key, 12..20).await.unwrap();
        assert!(retrieved.is_empty());
    }

    #[tokio::test]
    async fn test_head_and_delete() {
        let backend = InMemoryBackend::new();
        let key = object("test-key");
        backend.put_object(&key, "test content", Some("text/plain")).await;

        let head = backend.head_object(&key).await.unwrap().unwrap();
        assert_eq!(Some(12), head.content_length);
        assert_eq!(Some("text/plain"), head.content_type.as_deref());

        backend.delete_object(&key).await.unwrap();
        assert!(backend.head_object(&key).await.unwrap().is_none());

        let err = backend.get_object_range(&key, 0..1).await.unwrap_err();
        assert_eq!(&ErrorKind::ObjectNotFound, err.kind());
    }

    #[tokio::test]
    async fn test_list_objects() {
        let backend = InMemoryBackend::new();
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            backend.put_object(&object(key), key, None).await;
        }

        let request = ListObjectsRequest {
            prefix: Some("a/".to_owned()),
            start_after: None,
            limit: 2,
        };
        let page = backend.list_objects("test-bucket", request).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(vec!["a/1", "a/2"], keys);
        assert!(page.is_truncated);

        let request = ListObjectsRequest {
            prefix: Some("a/".to_owned()),
            start_after: page.next_start_after().map(str::to_owned),
            limit: 2,
        };
        let page = backend.list_objects("test-bucket", request).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(vec!["a/3"], keys);
        assert!(!page.is_truncated);

        let page = backend
            .list_objects("other-bucket", ListObjectsRequest { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert!(page.objects.is_empty());
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let backend = InMemoryBackend::new();
        let key = object("test-key");
        let upload_id = backend.create_multipart_upload(&key, None).await.unwrap();

        let e_tag1 = backend
            .upload_part(&key, &upload_id, 1, Bytes::from("part1"))
            .await
            .unwrap();
        let e_tag2 = backend
            .upload_part(&key, &upload_id, 2, Bytes::from("part2"))
            .await
            .unwrap();

        let parts = backend.list_parts(&key, &upload_id).await.unwrap();
        assert_eq!(2, parts.len());
        assert_eq!(e_tag1, parts[0].e_tag);
        assert_eq!(e_tag2, parts[1].e_tag);
        assert_eq!(format!("\"{:x}\"", md5::compute("part1")), e_tag1);

        let completed = backend
            .complete_multipart_upload(&key, &upload_id, &parts)
            .await
            .unwrap();
        let mut digests = Vec::new();
        digests.extend_from_slice(&md5::compute("part1").0);
        digests.extend_from_slice(&md5::compute("part2").0);
        assert_eq!(
            Some(format!("\"{:x}-2\"", md5::compute(&digests))),
            completed.e_tag
        );
        assert_eq!(Some(Bytes::from("part1part2")), backend.object_data(&key).await);
        assert_eq!(0, backend.pending_uploads().await);
    }

    #[tokio::test]
    async fn test_complete_rejects_unknown_part() {
        let backend = InMemoryBackend::new();
        let key = object("test-key");
        let upload_id = backend.create_multipart_upload(&key, None).await.unwrap();
        backend
            .upload_part(&key, &upload_id, 1, Bytes::from("part1"))
            .await
            .unwrap();

        let parts = vec![CompletedPart {
            part_number: 1,
            e_tag: "\"bogus\"".to_owned(),
            size: 5,
        }];
        let err = backend
            .complete_multipart_upload(&key, &upload_id, &parts)
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::BackendRejected, err.kind());
        // the upload is still pending
        assert_eq!(1, backend.pending_uploads().await);
    }

    #[tokio::test]
    async fn test_abort_multipart_upload() {
        let backend = InMemoryBackend::new();
        let key = object("test-key");
        let upload_id = backend.create_multipart_upload(&key, None).await.unwrap();
        backend
            .upload_part(&key, &upload_id, 1, Bytes::from("part1"))
            .await
            .unwrap();

        backend.abort_multipart_upload(&key, &upload_id).await.unwrap();

        let err = backend.list_parts(&key, &upload_id).await.unwrap_err();
        assert_eq!(&ErrorKind::BackendRejected, err.kind());
        let err = backend
            .abort_multipart_upload(&key, &upload_id)
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::BackendRejected, err.kind());
    }
}
