use async_trait::async_trait;
use mealprep_core::MealPrepResult;

use crate::message::{MessageId, QueueMessage};

/// FIFO list store keyed by queue name.
///
/// Entries are raw encoded strings so that a popped message can be pushed
/// back byte for byte. Transport failures surface as `StoreUnavailable`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append an encoded message at the tail; returns the message's job id
    async fn enqueue(&self, queue: &str, message: &QueueMessage) -> MealPrepResult<MessageId>;
    /// Append an already-encoded entry at the tail
    async fn push_raw(&self, queue: &str, raw: String) -> MealPrepResult<()>;
    /// Destructive pop from the head
    async fn dequeue(&self, queue: &str) -> MealPrepResult<Option<String>>;
    async fn peek(&self, queue: &str) -> MealPrepResult<Option<String>>;
    async fn length(&self, queue: &str) -> MealPrepResult<usize>;
    async fn clear(&self, queue: &str) -> MealPrepResult<()>;
    /// Remove the first entry, scanning from the head, whose `jobId` equals
    /// `id`. Unparseable entries are skipped.
    async fn remove_by_id(&self, queue: &str, id: &str) -> MealPrepResult<bool>;
    /// Whole list, head first, without removing anything
    async fn snapshot(&self, queue: &str) -> MealPrepResult<Vec<String>>;

    async fn is_empty(&self, queue: &str) -> MealPrepResult<bool> {
        Ok(self.length(queue).await? == 0)
    }
}
