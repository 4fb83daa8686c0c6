/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/* Automatically managed default lints */
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
/* End of automatically managed default lints */

//! AWS S3 Media Bridge
//!
//! Moves media files between local storage and a single Amazon S3 bucket.
//!
//! - Uploads go through resumable multipart sessions. Transient failures are retried per
//!   part, and a session can be snapshotted and continued later from the parts the backend
//!   has acknowledged.
//! - Reads are served as ordered blocks through a [`StreamCursor`](operation::stream::StreamCursor),
//!   including HTTP byte ranges for media playback.
//!
//! # Examples
//!
//! Load the default configuration:
//!
//! ```no_run
//! # async fn example() -> Result<(), aws_s3_media_bridge::error::Error> {
//! let config = aws_s3_media_bridge::from_env().bucket("media").load().await?;
//! let client = aws_s3_media_bridge::Client::new(config);
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

pub(crate) const MEBIBYTE: u64 = 1024 * 1024;

/// Error types emitted by `aws-s3-media-bridge`
pub mod error;

/// Common types used by `aws-s3-media-bridge`
pub mod types;

/// Types and helpers for I/O
pub mod io;

/// Object storage backends
pub mod backend;

/// Media bridge client
pub mod client;

/// Media bridge configuration
pub mod config;

/// Media bridge operations
pub mod operation;

pub(crate) mod http;

pub(crate) mod middleware;

pub use self::client::Client;
pub use self::config::Config;

/// Create a config loader
pub fn from_env() -> config::loader::ConfigLoader {
    config::loader::ConfigLoader::default()
}
