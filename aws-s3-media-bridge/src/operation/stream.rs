/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Reading a remote object as a sequence of bounded blocks.

use std::ops::Range;
use std::sync::Arc;

use aws_smithy_types::error::display::DisplayErrorContext;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tower::retry::budget::TpsBudget;
use tracing::Instrument;

use crate::backend::StorageBackend;
use crate::error::{self, Error, ErrorKind, FailurePoint};
use crate::http::header;
use crate::middleware::retry::{self, RetryPolicy};
use crate::types::{ObjectRef, RetryConfig};
use crate::MEBIBYTE;

/// Default number of bytes fetched from the backend per request
pub const DEFAULT_FETCH_SIZE: u64 = MEBIBYTE;

/// A chunk of an object returned by [`StreamCursor::read_block`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The bytes read, possibly empty
    pub data: Bytes,
    /// True if the cursor reached the end of the object with this block
    pub end_of_stream: bool,
}

/// A position within a remote object.
///
/// Blocks are served from a read-ahead buffer filled by ranged GETs of `fetch_size` bytes,
/// so reading in small blocks does not turn into small HTTP requests. A failed read leaves
/// the position unchanged; reading again re-requests the same range.
#[derive(Debug)]
pub struct StreamCursor {
    backend: Arc<dyn StorageBackend>,
    object: ObjectRef,
    position: u64,
    length: Option<u64>,
    content_type: Option<String>,
    seekable: bool,
    closed: bool,
    fetch_size: u64,
    // buffered bytes start at `buffer_start`
    buffer: Bytes,
    buffer_start: u64,
    token: CancellationToken,
}

impl StreamCursor {
    /// Open a cursor at the start of `object`.
    ///
    /// `seek` is only allowed when `seekable` is true.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        object: ObjectRef,
        seekable: bool,
    ) -> Result<StreamCursor, Error> {
        let head = backend
            .head_object(&object)
            .instrument(tracing::debug_span!("send-head-object", %object))
            .await?
            .ok_or_else(|| error::object_not_found(object.key()))?;

        Ok(StreamCursor {
            backend,
            object,
            position: 0,
            length: head.content_length,
            content_type: head.content_type,
            seekable,
            closed: false,
            fetch_size: DEFAULT_FETCH_SIZE,
            buffer: Bytes::new(),
            buffer_start: 0,
            token: CancellationToken::new(),
        })
    }

    /// Number of bytes requested from the backend at a time. Never less than the block size
    /// being read.
    pub fn with_fetch_size(mut self, fetch_size: u64) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Use `token` to cancel in-flight fetches of this cursor.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Read up to `max_bytes` from the current position.
    ///
    /// Reading at the end of the object returns an empty block with `end_of_stream` set.
    pub async fn read_block(&mut self, max_bytes: usize) -> Result<Block, Error> {
        self.ensure_open()?;
        if max_bytes == 0 {
            return Err(error::invalid_input("block size must be greater than zero"));
        }
        if self.at_end() {
            return Ok(Block {
                data: Bytes::new(),
                end_of_stream: true,
            });
        }

        if !self.buffered(self.position) {
            self.fill_buffer(max_bytes as u64).await?;
        }

        let offset = (self.position - self.buffer_start) as usize;
        let len = max_bytes.min(self.buffer.len() - offset);
        let data = self.buffer.slice(offset..offset + len);
        self.position += len as u64;
        tracing::trace!("read block of {len} bytes, now at {}", self.position);

        Ok(Block {
            data,
            end_of_stream: self.at_end(),
        })
    }

    /// Move to `offset`.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::NotSeekable`] if the cursor was opened without seek support
    /// - [`ErrorKind::InputInvalid`] if `offset` is past the end of the object
    ///
    /// The position is unchanged on error.
    pub fn seek(&mut self, offset: u64) -> Result<(), Error> {
        self.ensure_open()?;
        if !self.seekable {
            return Err(Error::new(
                ErrorKind::NotSeekable,
                "cursor was opened without seek support",
            )
            .at(self.failure_point()));
        }
        if let Some(length) = self.length {
            if offset > length {
                return Err(error::invalid_input(format!(
                    "cannot seek to {offset}, object has {length} bytes"
                ))
                .at(self.failure_point()));
            }
        }
        if !self.buffered(offset) {
            self.buffer = Bytes::new();
            self.buffer_start = offset;
        }
        self.position = offset;
        Ok(())
    }

    /// Release the read-ahead buffer. Any later read or seek fails with
    /// [`ErrorKind::UseAfterClose`]. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.closed = true;
        self.buffer = Bytes::new();
    }

    /// Current position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Object length, if known
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Content type reported by the backend
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The object being read
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// True once [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True if the cursor supports [`seek`](Self::seek)
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Write every remaining block to `sink` and close the cursor.
    ///
    /// Transient read failures are retried according to `retry`. Returns the number of bytes
    /// written.
    pub async fn copy_to_sink<W>(
        &mut self,
        sink: &mut W,
        block_size: usize,
        retry: &RetryConfig,
    ) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut policy = RetryPolicy::new(retry.clone(), Arc::new(TpsBudget::default()));
        self.copy_bounded(sink, block_size, None, &mut policy).await
    }

    /// Copy at most `limit` bytes (all remaining bytes if `None`) to `sink`, then close.
    pub(crate) async fn copy_bounded<W>(
        &mut self,
        sink: &mut W,
        block_size: usize,
        limit: Option<u64>,
        policy: &mut RetryPolicy,
    ) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        loop {
            let want = match limit {
                Some(limit) if written >= limit => break,
                Some(limit) => (limit - written).min(block_size as u64) as usize,
                None => block_size,
            };
            let block = match self.read_block(want).await {
                Ok(block) => {
                    policy.on_success();
                    block
                }
                Err(err) => match policy.next_backoff(&err) {
                    Some(delay) => {
                        tracing::warn!(
                            "retrying read of {} at {} in {delay:?}: {}",
                            self.object,
                            self.position,
                            DisplayErrorContext(&err)
                        );
                        retry::backoff(delay, &self.token).await?;
                        continue;
                    }
                    None => return Err(err),
                },
            };

            sink.write_all(&block.data).await?;
            written += block.data.len() as u64;
            if block.end_of_stream {
                break;
            }
        }
        sink.flush().await?;
        self.close();
        Ok(written)
    }

    /// Adapt the cursor into a stream of blocks, e.g. for an HTTP response body.
    ///
    /// The stream ends after the last block or after the first error.
    pub fn into_stream(
        self,
        block_size: usize,
    ) -> impl Stream<Item = Result<Bytes, Error>> + Send + 'static {
        stream::unfold(Some(self), move |cursor| async move {
            let mut cursor = cursor?;
            loop {
                match cursor.read_block(block_size).await {
                    Ok(Block {
                        data,
                        end_of_stream,
                    }) => {
                        let next = if end_of_stream {
                            cursor.close();
                            None
                        } else {
                            Some(cursor)
                        };
                        if data.is_empty() {
                            // nothing left to yield
                            match next {
                                Some(c) => {
                                    cursor = c;
                                    continue;
                                }
                                None => return None,
                            }
                        }
                        return Some((Ok(data), next));
                    }
                    Err(err) => return Some((Err(err), None)),
                }
            }
        })
    }

    async fn fill_buffer(&mut self, min_len: u64) -> Result<(), Error> {
        let want = self.fetch_size.max(min_len);
        let start = self.position;
        let end = match self.length {
            Some(length) => start.saturating_add(want).min(length),
            None => start.saturating_add(want),
        };
        let range = start..end;

        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(error::operation_cancelled()),
            result = self
                .backend
                .get_object_range(&self.object, range.clone())
                .instrument(tracing::debug_span!("fetch-range", range = %header::format_range(&range))) => result,
        };
        let data = result.map_err(|err| err.at(self.failure_point()))?;

        let requested = range.end - range.start;
        if (data.len() as u64) < requested {
            // the object ends here
            self.length = Some(start + data.len() as u64);
        }
        self.buffer = data;
        self.buffer_start = start;
        Ok(())
    }

    fn buffer_end(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    /// True if the byte at `offset` is in the read-ahead buffer
    fn buffered(&self, offset: u64) -> bool {
        (self.buffer_start..self.buffer_end()).contains(&offset)
    }

    fn at_end(&self) -> bool {
        self.length.is_some_and(|length| self.position >= length)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(error::use_after_close().at(self.failure_point()));
        }
        Ok(())
    }

    fn failure_point(&self) -> FailurePoint {
        FailurePoint::Cursor {
            position: self.position,
        }
    }
}

/// Outcome of streaming a byte range of an object
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedRange {
    /// First byte streamed
    pub start: u64,
    /// One past the last byte streamed
    pub end: u64,
    /// Object length
    pub total: u64,
    /// Bytes written to the sink
    pub bytes_written: u64,
    /// Content type reported by the backend
    pub content_type: Option<String>,
    /// True if only part of the object was requested
    pub partial: bool,
}

impl StreamedRange {
    pub(crate) fn new(
        range: Range<u64>,
        total: u64,
        bytes_written: u64,
        content_type: Option<String>,
    ) -> Self {
        let partial = range.start > 0 || range.end < total;
        Self {
            start: range.start,
            end: range.end,
            total,
            bytes_written,
            content_type,
            partial,
        }
    }

    /// The `Content-Range` header value for this range, e.g. `bytes 0-499/1234`
    pub fn content_range(&self) -> String {
        header::format_content_range(&(self.start..self.end), self.total)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use bytes::Bytes;
    use futures_util::StreamExt;

    use super::{Block, StreamCursor, StreamedRange};
    use crate::backend::in_memory::InMemoryBackend;
    use crate::error::{ErrorKind, FailurePoint};
    use crate::types::{ObjectRef, RetryConfig};

    fn object() -> ObjectRef {
        ObjectRef::new("test-bucket", "videos/clip.mp4").unwrap()
    }

    fn payload(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    async fn backend_with(len: usize) -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .put_object(&object(), payload(len), Some("video/mp4"))
            .await;
        backend
    }

    #[tokio::test]
    async fn test_read_blocks_to_end() {
        let backend = backend_with(3000).await;
        let mut cursor = StreamCursor::open(backend, object(), false).await.unwrap();
        assert_eq!(Some(3000), cursor.length());
        assert_eq!(Some("video/mp4"), cursor.content_type());

        let sizes_and_eos: Vec<_> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                let block = cursor.read_block(1024).await.unwrap();
                out.push((block.data.len(), block.end_of_stream));
            }
            out
        };
        assert_eq!(vec![(1024, false), (1024, false), (952, true)], sizes_and_eos);
        assert_eq!(3000, cursor.position());

        // reading at the end is not an error
        let block = cursor.read_block(1024).await.unwrap();
        assert_eq!(
            Block {
                data: Bytes::new(),
                end_of_stream: true
            },
            block
        );
    }

    #[tokio::test]
    async fn test_blocks_are_contiguous() {
        let expected = payload(777);
        let backend = backend_with(777).await;
        for block_size in [1, 7, 100, 776, 777, 778] {
            let mut cursor = StreamCursor::open(backend.clone(), object(), false)
                .await
                .unwrap()
                .with_fetch_size(64);
            let mut collected = Vec::new();
            loop {
                let block = cursor.read_block(block_size).await.unwrap();
                assert!(block.data.len() <= block_size);
                collected.extend_from_slice(&block.data);
                if block.end_of_stream {
                    break;
                }
            }
            assert_eq!(expected, Bytes::from(collected), "block size {block_size}");
        }
    }

    #[tokio::test]
    async fn test_open_missing_object() {
        let backend = Arc::new(InMemoryBackend::new());
        let err = StreamCursor::open(backend, object(), true).await.unwrap_err();
        assert_eq!(&ErrorKind::ObjectNotFound, err.kind());
    }

    #[tokio::test]
    async fn test_zero_block_size() {
        let backend = backend_with(10).await;
        let mut cursor = StreamCursor::open(backend, object(), false).await.unwrap();
        let err = cursor.read_block(0).await.unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
    }

    #[tokio::test]
    async fn test_seek_not_seekable() {
        let backend = backend_with(100).await;
        let mut cursor = StreamCursor::open(backend, object(), false).await.unwrap();
        cursor.read_block(10).await.unwrap();

        let err = cursor.seek(50).unwrap_err();
        assert_eq!(&ErrorKind::NotSeekable, err.kind());
        assert_eq!(Some(&FailurePoint::Cursor { position: 10 }), err.failure_point());
        assert_eq!(10, cursor.position());
    }

    #[tokio::test]
    async fn test_seek() {
        let expected = payload(100);
        let backend = backend_with(100).await;
        let mut cursor = StreamCursor::open(backend, object(), true)
            .await
            .unwrap()
            .with_fetch_size(16);

        cursor.seek(90).unwrap();
        let block = cursor.read_block(64).await.unwrap();
        assert_eq!(expected.slice(90..100), block.data);
        assert!(block.end_of_stream);

        // back inside the buffered window
        cursor.seek(95).unwrap();
        assert_eq!(expected.slice(95..97), cursor.read_block(2).await.unwrap().data);

        cursor.seek(0).unwrap();
        assert_eq!(expected.slice(0..4), cursor.read_block(4).await.unwrap().data);

        let err = cursor.seek(101).unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
        assert_eq!(4, cursor.position());

        // seeking to the end is allowed
        cursor.seek(100).unwrap();
        assert!(cursor.read_block(1).await.unwrap().end_of_stream);
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let backend = backend_with(100).await;
        let mut cursor = StreamCursor::open(backend, object(), true).await.unwrap();
        cursor.close();
        cursor.close();
        assert!(cursor.is_closed());

        let err = cursor.read_block(10).await.unwrap_err();
        assert_eq!(&ErrorKind::UseAfterClose, err.kind());
        let err = cursor.seek(0).unwrap_err();
        assert_eq!(&ErrorKind::UseAfterClose, err.kind());
    }

    #[tokio::test]
    async fn test_cancelled_read_keeps_position() {
        let backend = backend_with(100).await;
        let mut cursor = StreamCursor::open(backend, object(), false)
            .await
            .unwrap()
            .with_fetch_size(10);
        cursor.read_block(10).await.unwrap();

        let token = tokio_util::sync::CancellationToken::new();
        let mut cursor = cursor.with_cancellation(token.clone());
        token.cancel();
        let err = cursor.read_block(10).await.unwrap_err();
        assert_eq!(&ErrorKind::OperationCancelled, err.kind());
        assert_eq!(10, cursor.position());
    }

    #[tokio::test]
    async fn test_copy_to_sink() {
        let expected = payload(5000);
        let backend = backend_with(5000).await;
        let mut cursor = StreamCursor::open(backend, object(), false).await.unwrap();

        let mut sink = Vec::new();
        let written = cursor
            .copy_to_sink(&mut sink, 1024, &RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(5000, written);
        assert_eq!(expected, Bytes::from(sink));
        assert!(cursor.is_closed());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let expected = payload(2500);
        let backend = backend_with(2500).await;
        let cursor = StreamCursor::open(backend, object(), false).await.unwrap();

        let blocks: Vec<_> = cursor
            .into_stream(1000)
            .map(|block| block.unwrap())
            .collect()
            .await;
        let sizes: Vec<_> = blocks.iter().map(|b| b.len()).collect();
        assert_eq!(vec![1000, 1000, 500], sizes);
        assert_eq!(expected, Bytes::from(blocks.concat()));
    }

    #[tokio::test]
    async fn test_empty_object() {
        let backend = backend_with(0).await;
        let mut cursor = StreamCursor::open(backend.clone(), object(), false).await.unwrap();
        let block = cursor.read_block(1024).await.unwrap();
        assert!(block.data.is_empty());
        assert!(block.end_of_stream);

        let cursor = StreamCursor::open(backend, object(), false).await.unwrap();
        let blocks: Vec<_> = cursor.into_stream(1024).collect().await;
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_streamed_range() {
        let range = StreamedRange::new(0..500, 1234, 500, None);
        assert!(range.partial);
        assert_eq!("bytes 0-499/1234", range.content_range());

        let range = StreamedRange::new(0..1234, 1234, 1234, None);
        assert!(!range.partial);
    }
}
