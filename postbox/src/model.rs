//! The rows a [MessageQueueStore](crate::MessageQueueStore) owns.
//!
//! A [GlobalMessage] is written once by a sender and copied into the
//! private queue of every subscription as a [SubscriptionQueueItem]. The
//! existence of a queue item means "not yet delivered to that subscriber".

use std::fmt::{self, Display};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::constants::SUBSCRIPTION_NAMESPACE;

/// Unique id of a published message. Generated ids are UUIDv7, so they
/// sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one logical consumer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// A stable id for a named consumer. The same name always maps to the
    /// same subscription, which lets a restarted consumer pick up its own
    /// queue.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&SUBSCRIPTION_NAMESPACE, name.as_bytes()))
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A message handed to [enqueue](crate::MessageQueueStore::enqueue). The
/// store assigns an id if none is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub message_id: Option<MessageId>,
    pub enqueue_time: DateTime<Utc>,
    /// Qualified name of the message type.
    pub type_name: String,
    /// Schema version of `type_name`.
    pub revision: i32,
    pub payload: Bytes,
}

/// A row of the global log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalMessage {
    pub message_id: MessageId,
    pub enqueue_time: DateTime<Utc>,
    /// Never earlier than `enqueue_time`.
    pub due_time: DateTime<Utc>,
    pub type_name: String,
    pub revision: i32,
    pub payload: Bytes,
}

impl GlobalMessage {
    /// Assign an id if absent and clamp the due time so that it is never
    /// earlier than the enqueue time.
    pub fn prepare(message: NewMessage, due_time: DateTime<Utc>) -> Self {
        Self {
            message_id: message.message_id.unwrap_or_else(MessageId::generate),
            due_time: due_time.max(message.enqueue_time),
            enqueue_time: message.enqueue_time,
            type_name: message.type_name,
            revision: message.revision,
            payload: message.payload,
        }
    }
}

/// A subscriber's private copy of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionQueueItem {
    pub subscription_id: SubscriptionId,
    pub message_id: MessageId,
    pub enqueue_time: DateTime<Utc>,
    pub due_time: DateTime<Utc>,
    /// How many times delivery of this item has failed.
    pub dequeue_attempts: i32,
    pub type_name: String,
    pub revision: i32,
    pub payload: Bytes,
}

impl SubscriptionQueueItem {
    /// The fan-out copy of `message` for `subscription_id`.
    pub fn fan_out(subscription_id: SubscriptionId, message: &GlobalMessage) -> Self {
        Self {
            subscription_id,
            message_id: message.message_id,
            enqueue_time: message.enqueue_time,
            due_time: message.due_time,
            dequeue_attempts: 0,
            type_name: message.type_name.clone(),
            revision: message.revision,
            payload: message.payload.clone(),
        }
    }

    /// The row which replaces this one after a failed delivery.
    pub fn for_redelivery(&self, enqueue_time: DateTime<Utc>) -> Self {
        Self {
            enqueue_time,
            dequeue_attempts: self.dequeue_attempts.saturating_add(1),
            ..self.clone()
        }
    }

    /// Dequeue order: fewest attempts first, then earliest due, then
    /// oldest.
    pub(crate) fn dequeue_key(&self) -> (i32, DateTime<Utc>, DateTime<Utc>, MessageId) {
        (
            self.dequeue_attempts,
            self.due_time,
            self.enqueue_time,
            self.message_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn new_message(message_id: Option<MessageId>) -> NewMessage {
        NewMessage {
            message_id,
            enqueue_time: Utc::now(),
            type_name: "test.Message".to_string(),
            revision: 1,
            payload: Bytes::from_static(b"payload"),
        }
    }

    #[test]
    fn test_prepare_assigns_id() {
        let message = new_message(None);
        let now = message.enqueue_time;
        let a = GlobalMessage::prepare(message.clone(), now);
        let b = GlobalMessage::prepare(message, now);
        assert_ne!(a.message_id, b.message_id);

        let id = MessageId::generate();
        let c = GlobalMessage::prepare(new_message(Some(id)), now);
        assert_eq!(c.message_id, id);
    }

    #[test]
    fn test_prepare_clamps_due_time() {
        let message = new_message(None);
        let enqueue_time = message.enqueue_time;
        let global = GlobalMessage::prepare(message.clone(), enqueue_time - Duration::hours(1));
        assert_eq!(global.due_time, enqueue_time);
        let later = enqueue_time + Duration::minutes(5);
        let global = GlobalMessage::prepare(message, later);
        assert_eq!(global.due_time, later);
    }

    #[test]
    fn test_for_redelivery() {
        let global = GlobalMessage::prepare(new_message(None), Utc::now());
        let item = SubscriptionQueueItem::fan_out(SubscriptionId::generate(), &global);
        assert_eq!(item.dequeue_attempts, 0);
        let now = Utc::now() + Duration::seconds(10);
        let redelivered = item.for_redelivery(now);
        assert_eq!(redelivered.dequeue_attempts, 1);
        assert_eq!(redelivered.enqueue_time, now);
        assert_eq!(redelivered.message_id, item.message_id);
        assert_eq!(redelivered.due_time, item.due_time);
    }

    #[test]
    fn test_subscription_from_name() {
        assert_eq!(
            SubscriptionId::from_name("billing"),
            SubscriptionId::from_name("billing")
        );
        assert_ne!(
            SubscriptionId::from_name("billing"),
            SubscriptionId::from_name("shipping")
        );
    }
}
