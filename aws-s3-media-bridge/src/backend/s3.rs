/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Amazon S3 implementation of the StorageBackend trait.

use std::ops::Range;
use std::time::SystemTime;

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use bytes::Bytes;
use tracing::Instrument;

use super::{CompletedObject, StorageBackend};
use crate::error::{self, Error, ErrorKind};
use crate::http::header;
use crate::types::{
    CompletedPart, ListObjectsPage, ListObjectsRequest, ObjectHead, ObjectRef, ObjectSummary,
};

/// A [`StorageBackend`] backed by an Amazon S3 client.
///
/// Request timeouts and SDK-level retries are whatever the client was configured with.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
}

impl S3Backend {
    /// Create a backend sending requests with `client`
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// The underlying S3 client
    pub fn client(&self) -> &aws_sdk_s3::Client {
        &self.client
    }
}

fn to_i32(value: u64, what: &str) -> Result<i32, Error> {
    i32::try_from(value).map_err(|_| error::invalid_input(format!("{what} out of range: {value}")))
}

fn to_u64(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or_default()
}

fn missing_field(field: &str) -> Error {
    Error::new(
        ErrorKind::BackendRejected,
        format!("response is missing `{field}`"),
    )
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn list_objects(
        &self,
        bucket: &str,
        request: ListObjectsRequest,
    ) -> Result<ListObjectsPage, Error> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(request.prefix)
            .set_start_after(request.start_after)
            .max_keys(to_i32(request.limit.into(), "limit")?)
            .send()
            .await?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?.to_owned();
                Some(ObjectSummary {
                    key,
                    size: to_u64(object.size()),
                    e_tag: object.e_tag().map(str::to_owned),
                    last_modified: object
                        .last_modified()
                        .and_then(|t| SystemTime::try_from(*t).ok()),
                })
            })
            .collect();

        Ok(ListObjectsPage {
            objects,
            is_truncated: resp.is_truncated().unwrap_or_default(),
        })
    }

    async fn head_object(&self, object: &ObjectRef) -> Result<Option<ObjectHead>, Error> {
        let result = self
            .client
            .head_object()
            .bucket(object.bucket())
            .key(object.key())
            .send()
            .await;

        match result {
            Ok(resp) => Ok(Some(ObjectHead {
                content_length: resp
                    .content_length()
                    .and_then(|len| u64::try_from(len).ok()),
                content_type: resp.content_type().map(str::to_owned),
                e_tag: resp.e_tag().map(str::to_owned),
            })),
            Err(err) => {
                let err = Error::from(err);
                if err.kind() == &ErrorKind::ObjectNotFound {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn get_object_range(&self, object: &ObjectRef, range: Range<u64>) -> Result<Bytes, Error> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let result = self
            .client
            .get_object()
            .bucket(object.bucket())
            .key(object.key())
            .range(header::format_range(&range))
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            // the range starts at or past the end of the object
            Err(err) if err.code() == Some("InvalidRange") => return Ok(Bytes::new()),
            Err(err) => return Err(err.into()),
        };
        let body = resp
            .body
            .collect()
            .instrument(tracing::debug_span!("collect-body"))
            .await?;
        Ok(body.into_bytes())
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), Error> {
        self.client
            .delete_object()
            .bucket(object.bucket())
            .key(object.key())
            .send()
            .await?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        object: &ObjectRef,
        content_type: Option<&str>,
    ) -> Result<String, Error> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(object.bucket())
            .key(object.key())
            .set_content_type(content_type.map(str::to_owned))
            .send()
            .await?;
        resp.upload_id()
            .map(str::to_owned)
            .ok_or_else(|| missing_field("UploadId"))
    }

    async fn upload_part(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        part_number: u64,
        content: Bytes,
    ) -> Result<String, Error> {
        let content_length = content.len() as i64;
        let resp = self
            .client
            .upload_part()
            .bucket(object.bucket())
            .key(object.key())
            .upload_id(upload_id)
            .part_number(to_i32(part_number, "part number")?)
            .content_length(content_length)
            .body(ByteStream::from(content))
            .send()
            .await?;
        resp.e_tag()
            .map(str::to_owned)
            .ok_or_else(|| missing_field("ETag"))
    }

    async fn list_parts(
        &self,
        object: &ObjectRef,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, Error> {
        let mut parts = Vec::new();
        let mut marker = None;
        loop {
            let resp = self
                .client
                .list_parts()
                .bucket(object.bucket())
                .key(object.key())
                .upload_id(upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await?;

            for part in resp.parts() {
                let part_number = part
                    .part_number()
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(|| missing_field("PartNumber"))?;
                let e_tag = part.e_tag().ok_or_else(|| missing_field("ETag"))?;
                parts.push(CompletedPart {
                    part_number,
                    e_tag: e_tag.to_owned(),
                    size: to_u64(part.size()),
                });
            }

            match (resp.is_truncated(), resp.next_part_number_marker()) {
                (Some(true), Some(next)) => marker = Some(next.to_owned()),
                _ => break,
            }
        }
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn complete_multipart_upload(
        &self,
        object: &ObjectRef,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedObject, Error> {
        let parts = parts
            .iter()
            .map(|p| {
                Ok(S3CompletedPart::builder()
                    .part_number(to_i32(p.part_number, "part number")?)
                    .e_tag(&p.e_tag)
                    .build())
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(object.bucket())
            .key(object.key())
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await?;

        Ok(CompletedObject {
            e_tag: resp.e_tag().map(str::to_owned),
            version_id: resp.version_id().map(str::to_owned),
        })
    }

    async fn abort_multipart_upload(&self, object: &ObjectRef, upload_id: &str) -> Result<(), Error> {
        self.client
            .abort_multipart_upload()
            .bucket(object.bucket())
            .key(object.key())
            .upload_id(upload_id)
            .send()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadOutput;
    use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadOutput;
    use aws_sdk_s3::operation::get_object::GetObjectOutput;
    use aws_sdk_s3::operation::head_object::{HeadObjectError, HeadObjectOutput};
    use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
    use aws_sdk_s3::operation::list_parts::ListPartsOutput;
    use aws_sdk_s3::operation::upload_part::UploadPartError;
    use aws_sdk_s3::operation::upload_part::UploadPartOutput;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::types::error::NotFound;
    use aws_sdk_s3::types::{Object, Part};
    use aws_smithy_mocks_experimental::{mock, mock_client, RuleMode};
    use aws_smithy_types::error::ErrorMetadata;
    use bytes::Bytes;

    use super::S3Backend;
    use crate::backend::StorageBackend;
    use crate::error::ErrorKind;
    use crate::types::{CompletedPart, ListObjectsRequest, ObjectRef};

    fn object() -> ObjectRef {
        ObjectRef::new("test-bucket", "videos/clip.mp4").unwrap()
    }

    #[tokio::test]
    async fn test_head_object_not_found() {
        let head = mock!(aws_sdk_s3::Client::head_object)
            .then_error(|| HeadObjectError::NotFound(NotFound::builder().build()));
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&head]);

        let backend = S3Backend::new(client);
        assert_eq!(None, backend.head_object(&object()).await.unwrap());
    }

    #[tokio::test]
    async fn test_head_object() {
        let head = mock!(aws_sdk_s3::Client::head_object)
            .match_requests(|r| r.key() == Some("videos/clip.mp4"))
            .then_output(|| {
                HeadObjectOutput::builder()
                    .content_length(3000)
                    .content_type("video/mp4")
                    .build()
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&head]);

        let backend = S3Backend::new(client);
        let head = backend.head_object(&object()).await.unwrap().unwrap();
        assert_eq!(Some(3000), head.content_length);
        assert_eq!(Some("video/mp4"), head.content_type.as_deref());
    }

    #[tokio::test]
    async fn test_get_object_range() {
        let get = mock!(aws_sdk_s3::Client::get_object)
            .match_requests(|r| r.range() == Some("bytes=1024-2047"))
            .then_output(|| {
                GetObjectOutput::builder()
                    .body(ByteStream::from_static(b"ranged body"))
                    .build()
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&get]);

        let backend = S3Backend::new(client);
        let body = backend
            .get_object_range(&object(), 1024..2048)
            .await
            .unwrap();
        assert_eq!(Bytes::from_static(b"ranged body"), body);
    }

    #[tokio::test]
    async fn test_list_objects() {
        let list = mock!(aws_sdk_s3::Client::list_objects_v2)
            .match_requests(|r| {
                r.prefix() == Some("videos/")
                    && r.start_after() == Some("videos/a.mp4")
                    && r.max_keys() == Some(2)
            })
            .then_output(|| {
                ListObjectsV2Output::builder()
                    .contents(Object::builder().key("videos/b.mp4").size(10).build())
                    .contents(Object::builder().key("videos/c.mp4").size(20).build())
                    .is_truncated(true)
                    .build()
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&list]);

        let backend = S3Backend::new(client);
        let request = ListObjectsRequest {
            prefix: Some("videos/".to_owned()),
            start_after: Some("videos/a.mp4".to_owned()),
            limit: 2,
        };
        let page = backend.list_objects("test-bucket", request).await.unwrap();
        assert_eq!(2, page.objects.len());
        assert_eq!(20, page.objects[1].size);
        assert_eq!(Some("videos/c.mp4"), page.next_start_after());
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let create = mock!(aws_sdk_s3::Client::create_multipart_upload)
            .match_requests(|r| r.content_type() == Some("video/mp4"))
            .then_output(|| {
                CreateMultipartUploadOutput::builder()
                    .upload_id("test-upload")
                    .build()
            });
        let upload = mock!(aws_sdk_s3::Client::upload_part)
            .match_requests(|r| {
                r.upload_id() == Some("test-upload")
                    && r.part_number() == Some(1)
                    && r.content_length() == Some(11)
            })
            .then_output(|| UploadPartOutput::builder().e_tag("\"etag-1\"").build());
        let complete = mock!(aws_sdk_s3::Client::complete_multipart_upload)
            .match_requests(|r| {
                let parts = r.multipart_upload().map(|m| m.parts()).unwrap_or_default();
                parts.len() == 1 && parts[0].e_tag() == Some("\"etag-1\"")
            })
            .then_output(|| {
                CompleteMultipartUploadOutput::builder()
                    .e_tag("\"final\"")
                    .build()
            });
        let client = mock_client!(
            aws_sdk_s3,
            RuleMode::Sequential,
            &[&create, &upload, &complete]
        );

        let backend = S3Backend::new(client);
        let upload_id = backend
            .create_multipart_upload(&object(), Some("video/mp4"))
            .await
            .unwrap();
        let e_tag = backend
            .upload_part(&object(), &upload_id, 1, Bytes::from_static(b"hello world"))
            .await
            .unwrap();
        let parts = vec![CompletedPart {
            part_number: 1,
            e_tag,
            size: 11,
        }];
        let completed = backend
            .complete_multipart_upload(&object(), &upload_id, &parts)
            .await
            .unwrap();
        assert_eq!(Some("\"final\""), completed.e_tag.as_deref());
    }

    #[tokio::test]
    async fn test_list_parts_paginated() {
        let page1 = mock!(aws_sdk_s3::Client::list_parts)
            .match_requests(|r| r.part_number_marker().is_none())
            .then_output(|| {
                ListPartsOutput::builder()
                    .parts(Part::builder().part_number(1).e_tag("\"a\"").size(5).build())
                    .is_truncated(true)
                    .next_part_number_marker("1")
                    .build()
            });
        let page2 = mock!(aws_sdk_s3::Client::list_parts)
            .match_requests(|r| r.part_number_marker() == Some("1"))
            .then_output(|| {
                ListPartsOutput::builder()
                    .parts(Part::builder().part_number(2).e_tag("\"b\"").size(3).build())
                    .is_truncated(false)
                    .build()
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&page1, &page2]);

        let backend = S3Backend::new(client);
        let parts = backend.list_parts(&object(), "test-upload").await.unwrap();
        let numbers: Vec<_> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(vec![1, 2], numbers);
        assert_eq!(8, parts.iter().map(|p| p.size).sum::<u64>());
    }

    #[tokio::test]
    async fn test_unknown_upload_rejected() {
        let upload = mock!(aws_sdk_s3::Client::upload_part).then_error(|| {
            UploadPartError::generic(ErrorMetadata::builder().code("NoSuchUpload").build())
        });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&upload]);

        let backend = S3Backend::new(client);
        let err = backend
            .upload_part(&object(), "gone", 1, Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::BackendRejected, err.kind());
        assert!(!err.is_transient());
    }
}
