use std::{error::Error, marker::PhantomData, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
    clock::{Clock, SystemClock},
    model::{MessageId, NewMessage},
    persistence::MessageQueueStore,
    serializer::Serializer,
};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to serialize message: {0}")]
    Serialize(Box<dyn Error + Send + Sync>),
    #[error("failed to enqueue message: {0}")]
    Store(Box<dyn Error + Send + Sync>),
}

/// When a message becomes deliverable. An absolute `deliver_at` takes
/// precedence over a relative `delay`; with neither it is due at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub deliver_at: Option<DateTime<Utc>>,
    pub delay: Option<Duration>,
}

impl DeliveryOptions {
    pub fn at(deliver_at: DateTime<Utc>) -> Self {
        Self {
            deliver_at: Some(deliver_at),
            delay: None,
        }
    }

    pub fn delayed(delay: Duration) -> Self {
        Self {
            deliver_at: None,
            delay: Some(delay),
        }
    }

    /// The due time of a message sent at `now`. Never earlier than `now`.
    pub fn due_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let due = match (self.deliver_at, self.delay) {
            (Some(at), _) => at,
            (None, Some(delay)) => now + delay,
            (None, None) => now,
        };
        due.max(now)
    }
}

/// A message about to be sent.
#[derive(Debug, Clone)]
pub struct Outgoing<M> {
    pub message: M,
    /// Reuse an id, e.g. to make a retried send idempotent. Sending an id
    /// which is still in the log does nothing.
    pub message_id: Option<MessageId>,
    pub options: DeliveryOptions,
}

impl<M> Outgoing<M> {
    pub fn new(message: M) -> Self {
        Self {
            message,
            message_id: None,
            options: DeliveryOptions::default(),
        }
    }

    pub fn with_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_options(mut self, options: DeliveryOptions) -> Self {
        self.options = options;
        self
    }
}

impl<M> From<M> for Outgoing<M> {
    fn from(message: M) -> Self {
        Self::new(message)
    }
}

/// Publishes messages to every subscription of a store.
pub struct MessageSender<M, S, Z> {
    store: Arc<S>,
    serializer: Arc<Z>,
    clock: Arc<dyn Clock>,
    phantom: PhantomData<fn(M)>,
}

impl<M, S, Z> MessageSender<M, S, Z>
where
    S: MessageQueueStore,
    Z: Serializer<M>,
{
    pub fn new(store: S, serializer: Z) -> Self {
        Self::from_shared(Arc::new(store), Arc::new(serializer))
    }

    pub fn from_shared(store: Arc<S>, serializer: Arc<Z>) -> Self {
        Self {
            store,
            serializer,
            clock: Arc::new(SystemClock),
            phantom: PhantomData,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enqueue each message in order, one transaction per message. Stops at
    /// the first failure; messages before it stay sent.
    pub async fn send<I>(&self, messages: I) -> Result<Vec<MessageId>, SendError>
    where
        I: IntoIterator<Item = Outgoing<M>>,
    {
        let mut ids = Vec::new();
        for outgoing in messages {
            ids.push(self.send_with(outgoing).await?);
        }
        Ok(ids)
    }

    pub async fn send_one(&self, message: M) -> Result<MessageId, SendError> {
        self.send_with(Outgoing::new(message)).await
    }

    /// Send a single message with its own id or delivery options.
    pub async fn send_with(&self, outgoing: Outgoing<M>) -> Result<MessageId, SendError> {
        let serialized = self
            .serializer
            .serialize(&outgoing.message)
            .map_err(|e| SendError::Serialize(Box::new(e)))?;
        let now = self.clock.now();
        let message = NewMessage {
            message_id: outgoing.message_id,
            enqueue_time: now,
            type_name: serialized.type_name,
            revision: serialized.revision,
            payload: serialized.payload,
        };
        let message_id = self
            .store
            .enqueue(message, outgoing.options.due_time(now))
            .await
            .map_err(|e| SendError::Store(Box::new(e)))?;
        debug!("Enqueued message {}", message_id);
        Ok(message_id)
    }
}
