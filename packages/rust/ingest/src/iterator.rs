//! Single-pass input keys drawn from persisted tool records.

use std::marker::PhantomData;

use async_trait::async_trait;
use lakeflow_shared::{LakeflowError, Result};
use lakeflow_storage::{RecordCursor, Storage};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Lazily decodes each tool record of one scope into `T`.
///
/// The sequence is finite and cannot be restarted. Exhaustion is `Ok(None)`
/// and stays that way; a decode failure is an error.
pub struct CursorIterator<T> {
    cursor: Option<RecordCursor>,
    record_type: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> CursorIterator<T> {
    pub fn new(cursor: RecordCursor, record_type: &str) -> Self {
        Self {
            cursor: Some(cursor),
            record_type: record_type.to_string(),
            _marker: PhantomData,
        }
    }

    /// Iterate the `record_type` records stored for `scope_key`.
    pub async fn open(
        storage: &Storage,
        connection_id: u64,
        record_type: &str,
        scope_key: &str,
    ) -> Result<Self> {
        let cursor = storage
            .tool_records(connection_id, record_type, scope_key)
            .await?;
        Ok(Self::new(cursor, record_type))
    }

    pub async fn next(&mut self) -> Result<Option<T>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        match cursor.next().await? {
            Some(record) => serde_json::from_value(record.data).map(Some).map_err(|e| {
                LakeflowError::decode(format!("{}:{}", self.record_type, record.natural_key), e)
            }),
            None => {
                self.cursor = None;
                Ok(None)
            }
        }
    }
}

/// Source of input keys for an input-driven collector.
#[async_trait]
pub trait InputSource: Send {
    async fn next_input(&mut self) -> Result<Option<serde_json::Value>>;
}

#[async_trait]
impl<T> InputSource for CursorIterator<T>
where
    T: DeserializeOwned + Serialize + Send,
{
    async fn next_input(&mut self) -> Result<Option<serde_json::Value>> {
        match self.next().await? {
            Some(input) => serde_json::to_value(input)
                .map(Some)
                .map_err(|e| LakeflowError::decode(self.record_type.as_str(), e)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeflow_storage::{RawOrigin, ToolRecordRow};
    use serde::Deserialize;
    use serde_json::json;
    use uuid::Uuid;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct PrInput {
        bitbucket_id: u64,
    }

    async fn storage_with(records: &[(&str, serde_json::Value)]) -> Storage {
        let tmp = std::env::temp_dir().join(format!("lakeflow_iter_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.unwrap();
        let rows: Vec<ToolRecordRow> = records
            .iter()
            .map(|(key, data)| ToolRecordRow {
                connection_id: 1,
                record_type: "BitbucketPullRequest".into(),
                natural_key: key.to_string(),
                scope_key: "a/b".into(),
                data: data.clone(),
                origin: RawOrigin::default(),
            })
            .collect();
        storage.insert_tool_records(&rows).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn yields_in_order_then_stays_exhausted() {
        let storage = storage_with(&[
            ("3", json!({"bitbucket_id": 3, "title": "c"})),
            ("1", json!({"bitbucket_id": 1, "title": "a"})),
        ])
        .await;

        let mut iter = CursorIterator::<PrInput>::open(&storage, 1, "BitbucketPullRequest", "a/b")
            .await
            .unwrap();
        assert_eq!(iter.next().await.unwrap(), Some(PrInput { bitbucket_id: 3 }));
        assert_eq!(iter.next().await.unwrap(), Some(PrInput { bitbucket_id: 1 }));
        assert_eq!(iter.next().await.unwrap(), None);
        assert_eq!(iter.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn decode_failure_is_an_error_not_exhaustion() {
        let storage = storage_with(&[("9", json!({"title": "no id"}))]).await;
        let mut iter = CursorIterator::<PrInput>::open(&storage, 1, "BitbucketPullRequest", "a/b")
            .await
            .unwrap();
        let err = iter.next().await.unwrap_err();
        match err {
            LakeflowError::Decode { origin, .. } => assert_eq!(origin, "BitbucketPullRequest:9"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn input_source_projects_to_json() {
        let storage = storage_with(&[("5", json!({"bitbucket_id": 5, "title": "e"}))]).await;
        let mut source = CursorIterator::<PrInput>::open(&storage, 1, "BitbucketPullRequest", "a/b")
            .await
            .unwrap();
        assert_eq!(
            source.next_input().await.unwrap(),
            Some(json!({"bitbucket_id": 5}))
        );
        assert_eq!(source.next_input().await.unwrap(), None);
    }
}
