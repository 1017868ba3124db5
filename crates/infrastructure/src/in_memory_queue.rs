use async_trait::async_trait;
use mealprep_core::MealPrepResult;
use mealprep_domain::{MessageId, QueueMessage, QueueStore};
use metrics::counter;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// 内存队列实现
///
/// 每个队列名对应一个 `VecDeque`，适用于单进程部署和测试。
#[derive(Debug, Default, Clone)]
pub struct InMemoryQueueStore {
    queues: Arc<RwLock<HashMap<String, VecDeque<String>>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, queue: &str, message: &QueueMessage) -> MealPrepResult<MessageId> {
        let raw = message.encode()?;
        self.push_raw(queue, raw).await?;
        Ok(message.job_id.clone())
    }

    async fn push_raw(&self, queue: &str, raw: String) -> MealPrepResult<()> {
        let mut queues = self.queues.write().await;
        let entries = queues.entry(queue.to_string()).or_default();
        entries.push_back(raw);
        debug!(queue, length = entries.len(), "消息入队");
        counter!("mealprep_queue_pushed_total", "queue" => queue.to_string()).increment(1);
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> MealPrepResult<Option<String>> {
        let mut queues = self.queues.write().await;
        let raw = queues.get_mut(queue).and_then(VecDeque::pop_front);
        if raw.is_some() {
            counter!("mealprep_queue_popped_total", "queue" => queue.to_string()).increment(1);
        }
        Ok(raw)
    }

    async fn peek(&self, queue: &str) -> MealPrepResult<Option<String>> {
        let queues = self.queues.read().await;
        Ok(queues.get(queue).and_then(|q| q.front().cloned()))
    }

    async fn length(&self, queue: &str) -> MealPrepResult<usize> {
        let queues = self.queues.read().await;
        Ok(queues.get(queue).map_or(0, VecDeque::len))
    }

    async fn clear(&self, queue: &str) -> MealPrepResult<()> {
        self.queues.write().await.remove(queue);
        Ok(())
    }

    async fn remove_by_id(&self, queue: &str, id: &str) -> MealPrepResult<bool> {
        let mut queues = self.queues.write().await;
        let Some(entries) = queues.get_mut(queue) else {
            return Ok(false);
        };
        let position = entries
            .iter()
            .position(|raw| QueueMessage::peek_job_id(raw).as_deref() == Some(id));
        match position {
            Some(index) => {
                entries.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn snapshot(&self, queue: &str) -> MealPrepResult<Vec<String>> {
        let queues = self.queues.read().await;
        Ok(queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE: &str = "recipe-generation:queue";

    fn msg(id: &str) -> QueueMessage {
        QueueMessage::recipe_generation(id, "fall")
    }

    async fn ids(store: &InMemoryQueueStore) -> Vec<String> {
        store
            .snapshot(QUEUE)
            .await
            .unwrap()
            .iter()
            .filter_map(|raw| QueueMessage::peek_job_id(raw))
            .collect()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let store = InMemoryQueueStore::new();
        assert_eq!(store.enqueue(QUEUE, &msg("a")).await.unwrap(), "a");
        store.enqueue(QUEUE, &msg("b")).await.unwrap();

        let first = store.dequeue(QUEUE).await.unwrap().unwrap();
        let second = store.dequeue(QUEUE).await.unwrap().unwrap();
        assert_eq!(QueueMessage::decode(&first).unwrap().job_id, "a");
        assert_eq!(QueueMessage::decode(&second).unwrap().job_id, "b");
        assert!(store.dequeue(QUEUE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peek_length_clear() {
        let store = InMemoryQueueStore::new();
        assert!(store.is_empty(QUEUE).await.unwrap());
        assert!(store.peek(QUEUE).await.unwrap().is_none());

        store.enqueue(QUEUE, &msg("a")).await.unwrap();
        store.enqueue(QUEUE, &msg("b")).await.unwrap();

        let head = store.peek(QUEUE).await.unwrap().unwrap();
        assert_eq!(QueueMessage::peek_job_id(&head).as_deref(), Some("a"));
        assert_eq!(store.length(QUEUE).await.unwrap(), 2);

        store.clear(QUEUE).await.unwrap();
        assert!(store.is_empty(QUEUE).await.unwrap());
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let store = InMemoryQueueStore::new();
        store.enqueue(QUEUE, &msg("a")).await.unwrap();
        store.enqueue("images:queue", &msg("b")).await.unwrap();
        assert_eq!(store.length(QUEUE).await.unwrap(), 1);
        assert_eq!(store.length("images:queue").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_by_id_keeps_order() {
        let store = InMemoryQueueStore::new();
        for id in ["a", "b", "c", "b"] {
            store.enqueue(QUEUE, &msg(id)).await.unwrap();
        }

        assert!(store.remove_by_id(QUEUE, "b").await.unwrap());
        assert_eq!(ids(&store).await, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_remove_missing_id_is_noop() {
        let store = InMemoryQueueStore::new();
        store.enqueue(QUEUE, &msg("a")).await.unwrap();
        store.push_raw(QUEUE, "not json".to_string()).await.unwrap();

        assert!(!store.remove_by_id(QUEUE, "zzz").await.unwrap());
        assert_eq!(store.length(QUEUE).await.unwrap(), 2);
        assert!(!store.remove_by_id("other", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_push_raw_preserves_bytes() {
        let store = InMemoryQueueStore::new();
        let raw = r#"{"season":"fall","jobId":"x","extra":1}"#.to_string();
        store.push_raw(QUEUE, raw.clone()).await.unwrap();
        assert_eq!(store.dequeue(QUEUE).await.unwrap(), Some(raw));
    }
}
