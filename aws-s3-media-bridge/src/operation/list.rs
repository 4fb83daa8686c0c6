/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use tracing::Instrument;

use crate::backend::StorageBackend;
use crate::error::{self, Error};
use crate::types::{ListObjectsPage, ListObjectsRequest, ObjectSummary};

/// Maximum number of keys a single listing request returns
pub const MAX_LIST_LIMIT: u32 = 1000;

/// List one page of objects.
pub(crate) async fn list_page(
    backend: &dyn StorageBackend,
    bucket: &str,
    request: ListObjectsRequest,
) -> Result<ListObjectsPage, Error> {
    if request.limit == 0 || request.limit > MAX_LIST_LIMIT {
        return Err(error::invalid_input(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}, got {}",
            request.limit
        )));
    }
    backend
        .list_objects(bucket, request)
        .instrument(tracing::debug_span!("send-list-objects", bucket))
        .await
}

/// List every object under `prefix`, following pagination.
pub(crate) async fn list_all(
    backend: &dyn StorageBackend,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<Vec<ObjectSummary>, Error> {
    let mut objects = Vec::new();
    let mut start_after = None;
    loop {
        let request = ListObjectsRequest {
            prefix: prefix.map(str::to_owned),
            start_after: start_after.take(),
            limit: MAX_LIST_LIMIT,
        };
        let page = list_page(backend, bucket, request).await?;
        let next = page.next_start_after().map(str::to_owned);
        tracing::trace!("listed {} objects, more: {}", page.objects.len(), next.is_some());
        objects.extend(page.objects);
        match next {
            Some(key) => start_after = Some(key),
            None => return Ok(objects),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{list_all, list_page};
    use crate::backend::in_memory::InMemoryBackend;
    use crate::error::ErrorKind;
    use crate::types::{ListObjectsRequest, ObjectRef};

    #[tokio::test]
    async fn test_list_all_follows_pages() {
        let backend = InMemoryBackend::new();
        for i in 0..2500 {
            let object = ObjectRef::new("test-bucket", format!("videos/{i:05}.mp4")).unwrap();
            backend.put_object(&object, "x", None).await;
        }
        let other = ObjectRef::new("test-bucket", "images/cat.png").unwrap();
        backend.put_object(&other, "x", None).await;

        let objects = list_all(&backend, "test-bucket", Some("videos/"))
            .await
            .unwrap();
        assert_eq!(2500, objects.len());
        assert_eq!("videos/00000.mp4", objects[0].key);
        assert_eq!("videos/02499.mp4", objects[2499].key);

        let objects = list_all(&backend, "test-bucket", None).await.unwrap();
        assert_eq!(2501, objects.len());
    }

    #[tokio::test]
    async fn test_list_page_validates_limit() {
        let backend = InMemoryBackend::new();
        for limit in [0, 1001] {
            let request = ListObjectsRequest {
                limit,
                ..Default::default()
            };
            let err = list_page(&backend, "test-bucket", request).await.unwrap_err();
            assert_eq!(&ErrorKind::InputInvalid, err.kind());
        }
    }
}
