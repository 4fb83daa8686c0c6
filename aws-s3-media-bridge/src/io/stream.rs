/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::error::{self, ErrorKind};

/// A custom byte source that can be read from any offset.
///
/// Blanket-implemented for every `AsyncRead + AsyncSeek` type, e.g. [`tokio::fs::File`] or
/// [`std::io::Cursor`].
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T> SeekableSource for T where T: AsyncRead + AsyncSeek + Send + Unpin {}

/// Source of binary data for an upload.
///
/// Parts are always read at an explicit offset, so a part that failed to upload can be
/// read again without starting over from the beginning of the source.
#[derive(Debug)]
pub struct InputStream {
    pub(super) inner: RawInputStream,
}

impl InputStream {
    /// Create a new `InputStream` from a static byte slice
    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self::from(Bytes::from_static(bytes))
    }

    /// Create a new `InputStream` that reads data from a given `path`.
    ///
    /// ## Warning
    /// The contents of the file MUST not change. The length of the file is cached when
    /// the stream is created.
    ///
    /// # Examples
    /// ```no_run
    /// use aws_s3_media_bridge::io::InputStream;
    ///
    /// fn make_stream() -> InputStream {
    ///     InputStream::from_path("videos/intro.mp4").expect("file should be readable")
    /// }
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Result<InputStream, error::Error> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(error::invalid_input(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Self {
            inner: RawInputStream::Fs {
                path: path.to_path_buf(),
                length: metadata.len(),
            },
        })
    }

    /// Create a new `InputStream` that reads from a custom seekable source.
    pub fn from_reader<R: SeekableSource + 'static>(reader: R) -> Self {
        Self {
            inner: RawInputStream::Dyn {
                reader: Box::new(reader),
                length: None,
            },
        }
    }

    /// Total length of the source in bytes.
    pub async fn len(&mut self) -> Result<u64, error::Error> {
        self.inner.len().await
    }

    /// True if the source has no content
    pub async fn is_empty(&mut self) -> Result<bool, error::Error> {
        Ok(self.len().await? == 0)
    }

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Fewer bytes are returned only when the source ends first.
    pub(crate) async fn read_part(&mut self, offset: u64, len: u64) -> Result<Bytes, error::Error> {
        self.inner.read_part(offset, len).await
    }
}

pub(super) enum RawInputStream {
    /// In-memory buffer to read from
    Buf(Bytes),
    /// File based input
    Fs { path: PathBuf, length: u64 },
    /// User provided seekable source
    Dyn {
        reader: Box<dyn SeekableSource>,
        length: Option<u64>,
    },
}

impl RawInputStream {
    async fn len(&mut self) -> Result<u64, error::Error> {
        match self {
            RawInputStream::Buf(bytes) => Ok(bytes.len() as u64),
            RawInputStream::Fs { length, .. } => Ok(*length),
            RawInputStream::Dyn { reader, length } => match length {
                Some(length) => Ok(*length),
                None => {
                    let end = super::part_reader::seek_end(reader.as_mut()).await?;
                    *length = Some(end);
                    Ok(end)
                }
            },
        }
    }

    async fn read_part(&mut self, offset: u64, len: u64) -> Result<Bytes, error::Error> {
        let total = self.len().await?;
        if offset > total {
            return Err(error::Error::new(
                ErrorKind::InputInvalid,
                format!("offset {offset} is past the end of the source ({total} bytes)"),
            ));
        }
        let len = len.min(total - offset);
        match self {
            RawInputStream::Buf(bytes) => {
                let start = offset as usize;
                Ok(bytes.slice(start..start + len as usize))
            }
            RawInputStream::Fs { path, .. } => {
                super::part_reader::read_file_part(path.clone(), offset, len).await
            }
            RawInputStream::Dyn { reader, .. } => {
                super::part_reader::read_seekable_part(reader.as_mut(), offset, len).await
            }
        }
    }
}

impl fmt::Debug for RawInputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawInputStream::Buf(bytes) => f.debug_tuple("Buf").field(&bytes.len()).finish(),
            RawInputStream::Fs { path, length } => f
                .debug_struct("Fs")
                .field("path", path)
                .field("length", length)
                .finish(),
            RawInputStream::Dyn { length, .. } => f
                .debug_struct("Dyn(dyn SeekableSource)")
                .field("length", length)
                .finish(),
        }
    }
}

impl Default for InputStream {
    fn default() -> Self {
        Self::from(Bytes::default())
    }
}

impl From<Bytes> for InputStream {
    fn from(value: Bytes) -> Self {
        Self {
            inner: RawInputStream::Buf(value),
        }
    }
}

impl From<Vec<u8>> for InputStream {
    fn from(value: Vec<u8>) -> Self {
        Self::from(Bytes::from(value))
    }
}

impl From<&'static [u8]> for InputStream {
    fn from(slice: &'static [u8]) -> InputStream {
        Self::from(Bytes::from_static(slice))
    }
}

impl From<&'static str> for InputStream {
    fn from(slice: &'static str) -> InputStream {
        Self::from(Bytes::from_static(slice.as_bytes()))
    }
}
