/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use serde::{Deserialize, Serialize};

use crate::types::{CompletedPart, ObjectRef};

/// The state needed to resume a multipart upload.
///
/// The backend's own part list is authoritative on resume, so a snapshot with no parts is
/// a valid starting point: everything the backend acknowledged for `upload_id` is picked up.
/// Recorded parts are additionally checked against the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// The object being uploaded
    pub object: ObjectRef,
    /// The multipart upload ID
    pub upload_id: String,
    /// Size of every part but the last
    pub part_size: u64,
    /// Parts acknowledged when the snapshot was taken
    pub parts: Vec<CompletedPart>,
}

impl SessionSnapshot {
    /// A snapshot that only knows the upload, e.g. from an error's
    /// [`FailurePoint`](crate::error::FailurePoint).
    pub fn new(object: ObjectRef, upload_id: impl Into<String>, part_size: u64) -> Self {
        Self {
            object,
            upload_id: upload_id.into(),
            part_size,
            parts: Vec::new(),
        }
    }
}
