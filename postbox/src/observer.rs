//! The consumer side of a subscription is a push-based stream: many
//! `on_next`/`on_error` calls, followed by at most one `on_completed` once
//! the pump has fully stopped.

use std::{error::Error, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::MessageId;

/// What a handler returns when it could not process a message.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Everything a pump reports through [Observer::on_error].
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The store failed. Unless the pump restarts on faults, this ends the
    /// subscription.
    #[error("queue store failure: {0}")]
    Store(Arc<dyn Error + Send + Sync>),
    /// The payload could not be turned back into a message. It will be
    /// redelivered.
    #[error("failed to decode message {message_id} ({type_name} revision {revision}): {cause}")]
    Decode {
        message_id: MessageId,
        type_name: String,
        revision: i32,
        cause: Arc<dyn Error + Send + Sync>,
    },
    /// The handler rejected the message. It will be redelivered.
    #[error("handler failed for message {message_id}: {cause}")]
    Handler {
        message_id: MessageId,
        cause: Arc<dyn Error + Send + Sync>,
    },
    /// The message failed too often and was dropped from the queue.
    #[error("message {message_id} dropped after {attempts} failed attempts")]
    Poisoned { message_id: MessageId, attempts: i32 },
}

impl DeliveryError {
    pub(crate) fn store<E: Error + Send + Sync + 'static>(error: E) -> Self {
        DeliveryError::Store(Arc::new(error))
    }

    pub fn is_store(&self) -> bool {
        matches!(self, DeliveryError::Store(_))
    }

    /// The message this error concerns, if any.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            DeliveryError::Store(_) => None,
            DeliveryError::Decode { message_id, .. }
            | DeliveryError::Handler { message_id, .. }
            | DeliveryError::Poisoned { message_id, .. } => Some(*message_id),
        }
    }
}

/// Receives the messages of one subscription.
///
/// Handlers must be idempotent: delivery is at-least-once, so the same
/// message can arrive again after a crash or a failed attempt.
#[async_trait]
pub trait Observer<M>: Send + 'static
where
    M: Send + 'static,
{
    /// Handle one message. Returning an error schedules a redelivery.
    async fn on_next(&mut self, message: M) -> Result<(), HandlerError>;

    async fn on_error(&mut self, error: DeliveryError);

    /// The pump was cancelled and has stopped.
    async fn on_completed(&mut self);
}

#[cfg(any(test, feature = "mocks"))]
pub use recording::{ObserverEvent, RecordingObserver};

#[cfg(any(test, feature = "mocks"))]
mod recording {
    use std::{
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex, PoisonError,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time::{sleep, Instant};

    use super::{DeliveryError, HandlerError, Observer};

    #[derive(Debug, Clone)]
    pub enum ObserverEvent<M> {
        Next(M),
        Error(DeliveryError),
        Completed,
    }

    #[derive(Debug)]
    struct InjectedFailure;

    impl fmt::Display for InjectedFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "injected handler failure")
        }
    }

    impl std::error::Error for InjectedFailure {}

    /// Records every callback. Clones share the same record, so a test can
    /// keep one while the pump owns another.
    #[derive(Debug)]
    pub struct RecordingObserver<M> {
        events: Arc<Mutex<Vec<ObserverEvent<M>>>>,
        failures: Arc<AtomicUsize>,
    }

    impl<M> Clone for RecordingObserver<M> {
        fn clone(&self) -> Self {
            Self {
                events: Arc::clone(&self.events),
                failures: Arc::clone(&self.failures),
            }
        }
    }

    impl<M> Default for RecordingObserver<M> {
        fn default() -> Self {
            Self {
                events: Default::default(),
                failures: Default::default(),
            }
        }
    }

    impl<M: Clone> RecordingObserver<M> {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `count` calls to `on_next`. The message is still
        /// recorded.
        pub fn fail_next(&self, count: usize) {
            self.failures.store(count, Ordering::SeqCst);
        }

        pub fn events(&self) -> Vec<ObserverEvent<M>> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn messages(&self) -> Vec<M> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    ObserverEvent::Next(message) => Some(message),
                    _ => None,
                })
                .collect()
        }

        pub fn errors(&self) -> Vec<DeliveryError> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    ObserverEvent::Error(error) => Some(error),
                    _ => None,
                })
                .collect()
        }

        pub fn completions(&self) -> usize {
            self.events()
                .iter()
                .filter(|event| matches!(event, ObserverEvent::Completed))
                .count()
        }

        /// Poll the record until `predicate` holds. Returns false on
        /// timeout.
        pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
        where
            F: Fn(&[ObserverEvent<M>]) -> bool,
        {
            let deadline = Instant::now() + timeout;
            loop {
                {
                    let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
                    if predicate(&events) {
                        return true;
                    }
                }
                if Instant::now() >= deadline {
                    return false;
                }
                sleep(Duration::from_millis(10)).await;
            }
        }

        fn push(&self, event: ObserverEvent<M>) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }

    #[async_trait]
    impl<M> Observer<M> for RecordingObserver<M>
    where
        M: Clone + Send + 'static,
    {
        async fn on_next(&mut self, message: M) -> Result<(), HandlerError> {
            self.push(ObserverEvent::Next(message));
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(Box::new(InjectedFailure));
            }
            Ok(())
        }

        async fn on_error(&mut self, error: DeliveryError) {
            self.push(ObserverEvent::Error(error));
        }

        async fn on_completed(&mut self) {
            self.push(ObserverEvent::Completed);
        }
    }
}
