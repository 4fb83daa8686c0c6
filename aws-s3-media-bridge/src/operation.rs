/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Types for the multipart upload operation
pub mod upload;

/// Types for streaming reads of a single object
pub mod stream;

/// Listing objects
pub mod list;
