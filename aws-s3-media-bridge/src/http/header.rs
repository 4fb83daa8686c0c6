/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! `Range` / `Content-Range` header handling.

use std::ops::Range;
use std::str::FromStr;

use crate::error::{self, Error};

/// A single byte range as it appears in an HTTP `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteRange {
    /// `bytes=a-b` (both ends inclusive)
    Inclusive(u64, u64),
    /// `bytes=a-`
    AllFrom(u64),
    /// `bytes=-n`
    Last(u64),
}

impl FromStr for ByteRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || error::invalid_input(format!("invalid range header: `{s}`"));
        let ranges = s.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
        // multiple ranges are not supported
        if ranges.contains(',') {
            return Err(invalid());
        }
        let (start, end) = ranges.split_once('-').ok_or_else(invalid)?;
        let parse = |v: &str| v.trim().parse::<u64>().map_err(|_| invalid());

        match (start.trim().is_empty(), end.trim().is_empty()) {
            (false, false) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    return Err(invalid());
                }
                Ok(ByteRange::Inclusive(start, end))
            }
            (false, true) => Ok(ByteRange::AllFrom(parse(start)?)),
            (true, false) => Ok(ByteRange::Last(parse(end)?)),
            (true, true) => Err(invalid()),
        }
    }
}

impl ByteRange {
    /// Resolve against an object of `total` bytes, returning an end-exclusive range.
    pub(crate) fn resolve(&self, total: u64) -> Result<Range<u64>, Error> {
        let unsatisfiable = || {
            error::invalid_input(format!(
                "range {self:?} not satisfiable for object of {total} bytes"
            ))
        };
        let range = match *self {
            ByteRange::Inclusive(start, end) => start..end.saturating_add(1).min(total),
            ByteRange::AllFrom(start) => start..total,
            ByteRange::Last(n) => total.saturating_sub(n)..total,
        };
        if range.start >= total || range.is_empty() {
            return Err(unsatisfiable());
        }
        Ok(range)
    }
}

/// Format an end-exclusive range as the value of a `Range` request header.
pub(crate) fn format_range(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end.saturating_sub(1))
}

/// Format a `Content-Range` response header value for the end-exclusive `range`.
pub(crate) fn format_content_range(range: &Range<u64>, total: u64) -> String {
    format!(
        "bytes {}-{}/{}",
        range.start,
        range.end.saturating_sub(1),
        total
    )
}
