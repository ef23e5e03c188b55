use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{error::MemoryStoreError, reservation::MemoryReservation};
use crate::{
    model::{GlobalMessage, MessageId, NewMessage, SubscriptionId, SubscriptionQueueItem},
    persistence::MessageQueueStore,
};

/// Everything the store holds. Every operation runs under one lock, which
/// plays the part of a transaction.
#[derive(Debug, Default)]
pub(super) struct MemoryState {
    pub messages: BTreeMap<MessageId, GlobalMessage>,
    pub subscriptions: HashMap<SubscriptionId, DateTime<Utc>>,
    pub queues: HashMap<SubscriptionId, HashMap<MessageId, SubscriptionQueueItem>>,
}

impl MemoryState {
    /// Put a reserved item back, unless the subscription has gone or the
    /// row was rewritten in the meantime.
    pub fn restore(&mut self, item: SubscriptionQueueItem) {
        if let Some(queue) = self.queues.get_mut(&item.subscription_id) {
            queue.entry(item.message_id).or_insert(item);
        }
    }

    pub fn upsert(&mut self, subscription_id: SubscriptionId, item: SubscriptionQueueItem) -> bool {
        match self.queues.get_mut(&subscription_id) {
            Some(queue) => {
                queue.insert(
                    item.message_id,
                    SubscriptionQueueItem {
                        subscription_id,
                        ..item
                    },
                );
                true
            }
            None => false,
        }
    }
}

pub(super) type SharedState = Arc<Mutex<MemoryState>>;

pub(super) fn lock(state: &SharedState) -> MutexGuard<'_, MemoryState> {
    // no operation leaves the state half written, so a poisoned lock is
    // still consistent
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-process queue store. Reserved items are taken out of their queue
/// until the reservation finishes, so concurrent dequeuers skip them.
///
/// Nothing is ever written to disk. Cloning shares the underlying store.
#[derive(Debug, Default, Clone)]
pub struct MemoryQueueStore {
    state: SharedState,
    failures: Arc<AtomicUsize>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Make the next `count` operations fail with
    /// [MemoryStoreError::Unavailable].
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Every row of a subscription's queue, in dequeue order.
    pub fn queued(&self, subscription_id: SubscriptionId) -> Vec<SubscriptionQueueItem> {
        let state = lock(&self.state);
        let mut items: Vec<_> = state
            .queues
            .get(&subscription_id)
            .map(|queue| queue.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by_key(SubscriptionQueueItem::dequeue_key);
        items
    }

    /// Number of messages held in the global log.
    pub fn logged(&self) -> usize {
        lock(&self.state).messages.len()
    }

    fn check_available(&self) -> Result<(), MemoryStoreError> {
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(MemoryStoreError::Unavailable),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl MessageQueueStore for MemoryQueueStore {
    type Error = MemoryStoreError;
    type Reservation = MemoryReservation;

    async fn enqueue(
        &self,
        message: NewMessage,
        due_time: DateTime<Utc>,
    ) -> Result<MessageId, Self::Error> {
        self.check_available()?;
        let message = GlobalMessage::prepare(message, due_time);
        let message_id = message.message_id;
        let mut state = lock(&self.state);
        if state.messages.contains_key(&message_id) {
            debug!("Message {} is already logged, skipping", message_id);
            return Ok(message_id);
        }
        for (subscription_id, queue) in state.queues.iter_mut() {
            queue.insert(
                message_id,
                SubscriptionQueueItem::fan_out(*subscription_id, &message),
            );
        }
        state.messages.insert(message_id, message);
        Ok(message_id)
    }

    async fn enqueue_to_subscription(
        &self,
        subscription_id: SubscriptionId,
        item: SubscriptionQueueItem,
    ) -> Result<(), Self::Error> {
        self.check_available()?;
        if !lock(&self.state).upsert(subscription_id, item) {
            debug!("Subscription {} not found, dropping item", subscription_id);
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        subscription_id: SubscriptionId,
        creation_time: DateTime<Utc>,
    ) -> Result<bool, Self::Error> {
        self.check_available()?;
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if state.subscriptions.contains_key(&subscription_id) {
            return Ok(false);
        }
        state.subscriptions.insert(subscription_id, creation_time);
        let backfill = state
            .messages
            .values()
            .filter(|message| message.enqueue_time >= creation_time)
            .map(|message| {
                (
                    message.message_id,
                    SubscriptionQueueItem::fan_out(subscription_id, message),
                )
            })
            .collect();
        state.queues.insert(subscription_id, backfill);
        Ok(true)
    }

    async fn delete_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<bool, Self::Error> {
        self.check_available()?;
        let mut state = lock(&self.state);
        state.queues.remove(&subscription_id);
        Ok(state.subscriptions.remove(&subscription_id).is_some())
    }

    async fn dequeue(
        &self,
        subscription_id: SubscriptionId,
        as_of: DateTime<Utc>,
    ) -> Result<Self::Reservation, Self::Error> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let Some(queue) = state.queues.get_mut(&subscription_id) else {
            return Ok(MemoryReservation::empty());
        };
        let next = queue
            .values()
            .filter(|item| item.due_time <= as_of)
            .min_by_key(|item| item.dequeue_key())
            .map(|item| item.message_id);
        match next.and_then(|message_id| queue.remove(&message_id)) {
            Some(item) => Ok(MemoryReservation::reserved(item, Arc::clone(&self.state))),
            None => Ok(MemoryReservation::empty()),
        }
    }

    async fn queue_depth(&self, subscription_id: SubscriptionId) -> Result<u64, Self::Error> {
        self.check_available()?;
        Ok(lock(&self.state)
            .queues
            .get(&subscription_id)
            .map_or(0, |queue| queue.len() as u64))
    }

    async fn purge_messages(&self, older_than: DateTime<Utc>) -> Result<u64, Self::Error> {
        self.check_available()?;
        let mut state = lock(&self.state);
        let before = state.messages.len();
        state
            .messages
            .retain(|_, message| message.enqueue_time >= older_than);
        Ok((before - state.messages.len()) as u64)
    }
}
