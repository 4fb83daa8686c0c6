/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tower::retry::budget::TpsBudget;

use crate::backend::StorageBackend;
use crate::error::{self, Error, ErrorKind};
use crate::http::header::ByteRange;
use crate::io::InputStream;
use crate::middleware::retry::RetryPolicy;
use crate::operation::list;
use crate::operation::stream::{StreamCursor, StreamedRange};
use crate::operation::upload::builders::UploadFluentBuilder;
use crate::operation::upload::{SessionSnapshot, UploadHandle, UploadOutput};
use crate::types::{ListObjectsPage, ListObjectsRequest, ObjectData, ObjectRef, ObjectSummary, PartSize};
use crate::Config;

/// Media storage client bound to a single bucket
///
/// # Examples
/// Load a default client from the environment
/// ```no_run
/// async fn example() -> Result<(), aws_s3_media_bridge::error::Error> {
///     let client = aws_s3_media_bridge::from_env().load().await.map(aws_s3_media_bridge::Client::new)?;
///     let exists = client.exists("videos/intro.mp4").await?;
///     Ok(())
/// }
/// ```
///
/// Create a client with an explicit backend
/// ```
/// use aws_s3_media_bridge::backend::in_memory::InMemoryBackend;
///
/// let config = aws_s3_media_bridge::Config::builder()
///     .bucket("media")
///     .backend(InMemoryBackend::new())
///     .build()
///     .expect("valid config");
/// let client = aws_s3_media_bridge::Client::new(config);
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    handle: Arc<Handle>,
}

/// Whatever is needed to carry out operations, e.g. scheduling, budgets, config, etc.
#[derive(Debug)]
pub(crate) struct Handle {
    pub(crate) config: Config,
    retry_budget: Arc<TpsBudget>,
}

impl Handle {
    /// The configured storage backend
    pub(crate) fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.config.backend()
    }

    /// Resolve `key` within the configured bucket
    pub(crate) fn object(&self, key: impl Into<String>) -> Result<ObjectRef, Error> {
        ObjectRef::new(self.config.bucket(), key)
    }

    /// Get the concrete target part size to use for uploads
    pub(crate) fn upload_part_size_bytes(&self) -> u64 {
        match self.config.part_size() {
            PartSize::Auto => 8 * crate::MEBIBYTE,
            PartSize::Target(explicit) => *explicit,
        }
    }

    /// A fresh retry policy drawing from the client-wide budget
    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.retry().clone(), self.retry_budget.clone())
    }
}

impl Client {
    /// Creates a new client with a given config.
    pub fn new(config: Config) -> Client {
        let handle = Handle {
            config,
            retry_budget: Arc::new(TpsBudget::default()),
        };
        Client {
            handle: Arc::new(handle),
        }
    }

    /// Returns the client's configuration
    pub fn config(&self) -> &Config {
        &self.handle.config
    }

    /// Resolve `key` within the configured bucket.
    ///
    /// Fails with [`ErrorKind::InputInvalid`] for an empty key.
    pub fn object(&self, key: impl Into<String>) -> Result<ObjectRef, Error> {
        self.handle.object(key)
    }

    /// List one page of objects.
    ///
    /// `limit` defaults to (and may not exceed) 1000.
    pub async fn list_objects(
        &self,
        prefix: Option<&str>,
        start_after: Option<&str>,
        limit: Option<u32>,
    ) -> Result<ListObjectsPage, Error> {
        let request = ListObjectsRequest {
            prefix: prefix.map(str::to_owned),
            start_after: start_after.map(str::to_owned),
            limit: limit.unwrap_or(list::MAX_LIST_LIMIT),
        };
        list::list_page(self.backend().as_ref(), self.config().bucket(), request).await
    }

    /// List every object under `prefix`, following pagination.
    pub async fn list_all(&self, prefix: Option<&str>) -> Result<Vec<ObjectSummary>, Error> {
        list::list_all(self.backend().as_ref(), self.config().bucket(), prefix).await
    }

    /// True if `key` exists. Backend failures are returned, never reported as `false`.
    pub async fn exists(&self, key: &str) -> Result<bool, Error> {
        let object = self.object(key)?;
        Ok(self.backend().head_object(&object).await?.is_some())
    }

    /// Size of the object in bytes
    pub async fn size(&self, key: &str) -> Result<u64, Error> {
        let object = self.object(key)?;
        let head = self
            .backend()
            .head_object(&object)
            .await?
            .ok_or_else(|| error::object_not_found(key))?;
        head.content_length.ok_or_else(|| {
            Error::new(
                ErrorKind::BackendRejected,
                format!("no content length reported for `{key}`"),
            )
        })
    }

    /// Delete the object
    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        let object = self.object(key)?;
        self.backend().delete_object(&object).await
    }

    /// Read the whole object into memory
    pub async fn data(&self, key: &str) -> Result<ObjectData, Error> {
        let mut cursor = self.open_stream(key, false).await?;
        let content_type = cursor.content_type().map(str::to_owned);
        let mut body = Vec::with_capacity(cursor.length().unwrap_or_default() as usize);
        let block_size = usize::try_from(self.config().fetch_size()).unwrap_or(usize::MAX);
        let mut policy = self.handle.retry_policy();
        cursor
            .copy_bounded(&mut body, block_size, None, &mut policy)
            .await?;
        Ok(ObjectData {
            content_type,
            body: body.into(),
        })
    }

    /// Open a cursor over the object.
    ///
    /// [`StreamCursor::seek`] is only allowed when `seekable` is true.
    pub async fn open_stream(&self, key: &str, seekable: bool) -> Result<StreamCursor, Error> {
        let object = self.object(key)?;
        let cursor = StreamCursor::open(self.backend().clone(), object, seekable).await?;
        Ok(cursor.with_fetch_size(self.config().fetch_size()))
    }

    /// Copy the whole object to `sink` in blocks of the configured stream block size.
    ///
    /// Returns the number of bytes written.
    pub async fn stream_to<W>(&self, key: &str, sink: &mut W) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut cursor = self.open_stream(key, true).await?;
        let mut policy = self.handle.retry_policy();
        cursor
            .copy_bounded(sink, self.config().stream_block_size(), None, &mut policy)
            .await
    }

    /// Copy the part of the object selected by an HTTP `Range` header value to `sink`.
    ///
    /// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. An unsatisfiable or malformed range
    /// fails with [`ErrorKind::InputInvalid`] before anything is written.
    pub async fn stream_range_to<W>(
        &self,
        key: &str,
        range_header: &str,
        sink: &mut W,
    ) -> Result<StreamedRange, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let requested: ByteRange = range_header.parse()?;
        let mut cursor = self.open_stream(key, true).await?;
        let total = cursor.length().ok_or_else(|| {
            error::invalid_input(format!("length of `{key}` is unknown, cannot serve ranges"))
        })?;
        let range = requested.resolve(total)?;
        cursor.seek(range.start)?;

        let content_type = cursor.content_type().map(str::to_owned);
        let mut policy = self.handle.retry_policy();
        let bytes_written = cursor
            .copy_bounded(
                sink,
                self.config().stream_block_size(),
                Some(range.end - range.start),
                &mut policy,
            )
            .await?;
        Ok(StreamedRange::new(range, total, bytes_written, content_type))
    }

    /// An HTML `<source>` element pointing at the object under the public stream base URL.
    pub fn stream_link(&self, key: &str) -> Result<String, Error> {
        let base = self
            .config()
            .stream_base_url()
            .ok_or_else(|| error::invalid_input("no stream base URL configured"))?;
        let object = self.object(key)?;
        Ok(format!(
            "<source src='{base}{}' type='video/mp4'>",
            object.key()
        ))
    }

    /// Upload a single object.
    ///
    /// # Examples
    /// ```no_run
    /// use aws_s3_media_bridge::error::Error;
    /// use aws_s3_media_bridge::io::InputStream;
    ///
    /// async fn upload_file(client: &aws_s3_media_bridge::Client) -> Result<(), Error> {
    ///     let stream = InputStream::from_path("videos/intro.mp4")?;
    ///     let handle = client
    ///         .upload()
    ///         .key("videos/intro.mp4")
    ///         .content_type("video/mp4")
    ///         .body(stream)
    ///         .initiate()
    ///         .await?;
    ///
    ///     // upload() will return potentially before the upload is complete.
    ///     // The handle given must be joined to drive the request to completion.
    ///     // It can also be used to cancel or abort the upload.
    ///     let response = handle.join().await?;
    ///     // ... do something with response
    ///     Ok(())
    /// }
    /// ```
    pub fn upload(&self) -> UploadFluentBuilder {
        UploadFluentBuilder::new(self.handle.clone())
    }

    /// Continue the upload described by `snapshot` from `body`.
    pub async fn resume_upload(
        &self,
        snapshot: SessionSnapshot,
        body: impl Into<InputStream>,
    ) -> Result<UploadHandle, Error> {
        self.upload()
            .key(snapshot.object.key())
            .body(body)
            .resume_from(snapshot)
            .initiate()
            .await
    }

    /// Upload a local file to `dir/<file name>` (or `<file name>` without `dir`) and wait
    /// for it to complete.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        dir: Option<&str>,
    ) -> Result<UploadOutput, Error> {
        let path = path.as_ref();
        let key = upload_key(path, dir)?;
        let body = InputStream::from_path(path)?;
        tracing::debug!("uploading {} to {key}", path.display());
        self.upload().key(key).body(body).initiate().await?.join().await
    }

    fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.handle.backend()
    }
}

fn upload_key(path: &Path, dir: Option<&str>) -> Result<String, Error> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            error::invalid_input(format!("{} has no usable file name", path.display()))
        })?;
    Ok(match dir.map(|d| d.trim_end_matches('/')) {
        Some(dir) if !dir.is_empty() => format!("{dir}/{file_name}"),
        _ => file_name.to_owned(),
    })
}
