/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::types::{CompletedPart, ObjectRef};

/// Output of a completed upload
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOutput {
    /// The uploaded object
    pub object: ObjectRef,
    /// The multipart upload ID
    pub upload_id: String,
    /// Entity tag of the assembled object
    pub e_tag: Option<String>,
    /// Version ID of the object, if the bucket is versioned
    pub version_id: Option<String>,
    /// The parts the object was assembled from
    pub parts: Vec<CompletedPart>,
    /// Object size in bytes
    pub size: u64,
}

/// Result of aborting an upload through its handle
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortedUpload {
    /// The upload was stopped and the remote multipart upload removed
    Aborted {
        /// The multipart upload ID
        upload_id: String,
    },
    /// The upload was stopped and the remote multipart upload kept for a later resume
    Retained {
        /// The multipart upload ID
        upload_id: String,
    },
    /// The upload finished before it could be stopped
    Completed(UploadOutput),
}
