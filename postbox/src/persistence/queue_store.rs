//! The storage-agnostic queue protocol. Every backend implements exactly
//! this contract; the pump and the façade only ever talk to it.

use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    model::{MessageId, NewMessage, SubscriptionId, SubscriptionQueueItem},
    persistence::DequeueReservation,
};

/// This is the interface to the three durable collections: the global
/// message log, the subscriptions and the per-subscription queues.
///
/// Implementations surface storage errors as they are and never retry.
/// Dropping any of the returned futures must leave no partial state behind,
/// apart from a reservation which becomes available again on its own.
#[async_trait]
pub trait MessageQueueStore: Send + Sync + 'static {
    /// An error occurring from an operation.
    type Error: Error + Send + Sync + 'static;
    /// The handle returned by [dequeue](MessageQueueStore::dequeue).
    type Reservation: DequeueReservation<Error = Self::Error>;

    /// Append a message to the global log and, in the same transaction,
    /// copy it into the queue of every subscription which currently exists.
    /// A subscription created concurrently receives the message exactly
    /// once, either here or through its own backfill.
    ///
    /// A message whose id is still in the log is not appended or fanned out
    /// again; its id is returned as if it had been.
    async fn enqueue(
        &self,
        message: NewMessage,
        due_time: DateTime<Utc>,
    ) -> Result<MessageId, Self::Error>;

    /// Insert or overwrite a single queue row. Only used for redelivery:
    /// the global log and other subscriptions are untouched. Writing to a
    /// subscription which doesn't exist does nothing.
    async fn enqueue_to_subscription(
        &self,
        subscription_id: SubscriptionId,
        item: SubscriptionQueueItem,
    ) -> Result<(), Self::Error>;

    /// Create the subscription if it doesn't exist yet. On creation the
    /// queue is backfilled with every logged message enqueued at or after
    /// `creation_time`. Returns false if it already existed.
    async fn create_subscription(
        &self,
        subscription_id: SubscriptionId,
        creation_time: DateTime<Utc>,
    ) -> Result<bool, Self::Error>;

    /// Remove a subscription along with every row of its queue. Returns
    /// false if there was nothing to delete.
    async fn delete_subscription(&self, subscription_id: SubscriptionId)
        -> Result<bool, Self::Error>;

    /// Reserve the next item due at `as_of`, preferring the fewest dequeue
    /// attempts. The item stays withheld from every other dequeue until the
    /// reservation is committed or abandoned. Holding a reservation never
    /// blocks other operations on the store. When nothing is due an empty
    /// reservation is returned instead of waiting.
    async fn dequeue(
        &self,
        subscription_id: SubscriptionId,
        as_of: DateTime<Utc>,
    ) -> Result<Self::Reservation, Self::Error>;

    /// Number of rows in a subscription's queue, due or not. Rows held by a
    /// reservation are not counted.
    async fn queue_depth(&self, subscription_id: SubscriptionId) -> Result<u64, Self::Error>;

    /// Trim the global log. Queued copies are unaffected, but subscriptions
    /// created afterwards can no longer backfill the purged messages.
    async fn purge_messages(&self, older_than: DateTime<Utc>) -> Result<u64, Self::Error>;
}
