/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
use std::error::Error;
use std::path::PathBuf;

use aws_s3_media_bridge::types::{FailedMultipartUploadPolicy, PartSize};
use aws_s3_media_bridge::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use clap::Parser;
use tokio::io::AsyncWriteExt;

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "s3media")]
#[command(about = "Uploads, lists and plays back media objects in a single S3 bucket.")]
pub struct Args {
    /// Bucket to operate on (defaults to $AWS_S3_MEDIA_BUCKET)
    #[arg(long)]
    bucket: Option<String>,

    /// AWS region override
    #[arg(long)]
    region: Option<String>,

    /// Public base URL used by `link` (defaults to $AWS_S3_MEDIA_STREAM_URL)
    #[arg(long)]
    stream_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
enum Command {
    /// List objects under a prefix
    Ls { prefix: Option<String> },
    /// Check whether an object exists
    Exists { key: String },
    /// Print the size of an object in bytes
    Size { key: String },
    /// Delete an object
    Rm { key: String },
    /// Upload a local file, optionally under a directory prefix
    Put {
        path: PathBuf,
        #[arg(long)]
        dir: Option<String>,
        /// Part size in bytes
        #[arg(long, default_value_t = 8388608)]
        part_size: u64,
        /// Keep the remote upload on failure so it can be resumed
        #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
        retain: bool,
    },
    /// Stream an object (or a byte range of it) to stdout
    Cat {
        key: String,
        /// HTTP range, e.g. `bytes=0-1023`
        #[arg(long)]
        range: Option<String>,
    },
    /// Print the HTML `<source>` element for an object
    Link { key: String },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut loader = aws_s3_media_bridge::from_env();
    if let Some(bucket) = args.bucket {
        loader = loader.bucket(bucket);
    }
    if let Some(region) = args.region {
        loader = loader.region(region);
    }
    if let Some(url) = args.stream_url {
        loader = loader.stream_base_url(url);
    }
    let client = Client::new(loader.load().await?);

    let result = run(&client, args.command).await;
    if let Err(ref err) = result {
        tracing::error!("command failed: {}", DisplayErrorContext(err.as_ref()));
    }
    result
}

async fn run(client: &Client, command: Command) -> Result<(), BoxError> {
    match command {
        Command::Ls { prefix } => {
            for object in client.list_all(prefix.as_deref()).await? {
                println!("{:>12}  {}", object.size, object.key);
            }
        }
        Command::Exists { key } => println!("{}", client.exists(&key).await?),
        Command::Size { key } => println!("{}", client.size(&key).await?),
        Command::Rm { key } => client.delete(&key).await?,
        Command::Put {
            path,
            dir,
            part_size,
            retain,
        } => do_upload(client, path, dir, part_size, retain).await?,
        Command::Cat { key, range } => {
            let mut stdout = tokio::io::stdout();
            match range {
                Some(range) => {
                    let streamed = client.stream_range_to(&key, &range, &mut stdout).await?;
                    tracing::info!("sent {}", streamed.content_range());
                }
                None => {
                    let written = client.stream_to(&key, &mut stdout).await?;
                    tracing::info!("sent {written} bytes");
                }
            }
            stdout.flush().await?;
        }
        Command::Link { key } => println!("{}", client.stream_link(&key)?),
    }
    Ok(())
}

async fn do_upload(
    client: &Client,
    path: PathBuf,
    dir: Option<String>,
    part_size: u64,
    retain: bool,
) -> Result<(), BoxError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or("path has no file name")?;
    let key = match dir {
        Some(dir) => format!("{}/{file_name}", dir.trim_end_matches('/')),
        None => file_name.to_owned(),
    };
    let policy = if retain {
        FailedMultipartUploadPolicy::Retain
    } else {
        FailedMultipartUploadPolicy::AbortUpload
    };

    let start = std::time::Instant::now();
    let handle = client
        .upload()
        .key(&key)
        .body(aws_s3_media_bridge::io::InputStream::from_path(&path)?)
        .part_size(PartSize::Target(part_size))
        .failed_multipart_upload_policy(policy)
        .initiate()
        .await?;
    tracing::info!("started upload {} for {key}", handle.upload_id());

    let output = handle.join().await?;
    println!(
        "uploaded {} bytes to {} in {} parts ({:?})",
        output.size,
        output.object,
        output.parts.len(),
        start.elapsed()
    );
    Ok(())
}
