/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Random-access reads of a single part from an upload source.

use std::io::SeekFrom;
use std::ops::DerefMut;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::SeekableSource;
use crate::error::Error;

pub(super) async fn seek_end(reader: &mut dyn SeekableSource) -> Result<u64, Error> {
    let end = reader.seek(SeekFrom::End(0)).await?;
    Ok(end)
}

/// Read exactly `len` bytes of `path` starting at `offset` on the blocking thread pool.
pub(super) async fn read_file_part(path: PathBuf, offset: u64, len: u64) -> Result<Bytes, Error> {
    let handle = tokio::task::spawn_blocking(move || {
        let mut dst = BytesMut::zeroed(len as usize);
        file_util::read_file_chunk_sync(dst.deref_mut(), path, offset)?;
        Ok::<Bytes, Error>(dst.freeze())
    });

    handle.await?
}

pub(super) async fn read_seekable_part(
    reader: &mut dyn SeekableSource,
    offset: u64,
    len: u64,
) -> Result<Bytes, Error> {
    reader.seek(SeekFrom::Start(offset)).await?;
    let mut dst = BytesMut::zeroed(len as usize);
    reader.read_exact(dst.deref_mut()).await?;
    Ok(dst.freeze())
}

mod file_util {
    #[cfg(unix)]
    pub(super) use unix::read_file_chunk_sync;
    #[cfg(windows)]
    pub(super) use windows::read_file_chunk_sync;

    #[cfg(unix)]
    mod unix {
        use std::fs::File;
        use std::io;
        use std::os::unix::fs::FileExt;
        use std::path::Path;

        pub(crate) fn read_file_chunk_sync(
            dst: &mut [u8],
            path: impl AsRef<Path>,
            offset: u64,
        ) -> Result<(), io::Error> {
            let file = File::open(path)?;
            file.read_exact_at(dst, offset)
        }
    }

    #[cfg(windows)]
    mod windows {
        use std::fs::File;
        use std::io;
        use std::io::{Read, Seek, SeekFrom};
        use std::path::Path;

        pub(crate) fn read_file_chunk_sync(
            dst: &mut [u8],
            path: impl AsRef<Path>,
            offset: u64,
        ) -> Result<(), io::Error> {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(dst)
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::read_file_part;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_read_file_part_truncated_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "short").unwrap();

        // the file shrank after its length was cached
        let err = read_file_part(tmp.path().to_path_buf(), 2, 10)
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::IOError, err.kind());
    }
}
