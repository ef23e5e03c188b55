//! A [DeliveryPump] drives one subscription: it reserves the next due item,
//! decodes it, hands it to the observer and commits. One pump never has
//! more than one reservation open.
//!
//! The pump runs as a spawned task owned by a [SubscriptionHandle]. How the
//! task ended is always observable through [SubscriptionHandle::join]:
//!
//! - [PumpExit::Cancelled]: the handle was cancelled. The observer saw
//! `on_completed`.
//! - [PumpExit::Faulted]: the store failed and [FaultPolicy::Stop] was in
//! effect. The observer saw the error through `on_error`.
//! - [PumpExit::Panicked]: the observer panicked.

use std::{marker::PhantomData, sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    model::{SubscriptionId, SubscriptionQueueItem},
    observer::{DeliveryError, Observer},
    persistence::{DequeueReservation, MessageQueueStore},
    serializer::Serializer,
    throttle::Throttle,
};

/// What a pump does once its store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// End the pump with [PumpExit::Faulted].
    #[default]
    Stop,
    /// Wait for `delay`, then resume polling.
    Restart { delay: Duration },
}

#[derive(Debug, Clone, Default)]
pub struct PumpOptions {
    /// Drop an item once it has failed this many times. `None` retries
    /// forever.
    pub max_dequeue_attempts: Option<i32>,
    pub fault_policy: FaultPolicy,
}

impl PumpOptions {
    pub fn with_max_dequeue_attempts(mut self, attempts: i32) -> Self {
        self.max_dequeue_attempts = Some(attempts);
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    fn is_poisoned(&self, attempts: i32) -> bool {
        self.max_dequeue_attempts
            .map_or(false, |max| attempts >= max)
    }
}

/// How a pump task ended.
#[derive(Debug, Clone)]
pub enum PumpExit {
    Cancelled,
    Faulted(DeliveryError),
    Panicked,
}

impl PumpExit {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PumpExit::Cancelled)
    }
}

pub struct DeliveryPump<M, S, Z, O> {
    subscription_id: SubscriptionId,
    store: Arc<S>,
    serializer: Arc<Z>,
    clock: Arc<dyn Clock>,
    observer: O,
    options: PumpOptions,
    throttle: Throttle,
    phantom: PhantomData<fn() -> M>,
}

impl<M, S, Z, O> DeliveryPump<M, S, Z, O>
where
    M: Send + 'static,
    S: MessageQueueStore,
    Z: Serializer<M>,
    O: Observer<M>,
{
    pub fn new(
        subscription_id: SubscriptionId,
        store: Arc<S>,
        serializer: Arc<Z>,
        clock: Arc<dyn Clock>,
        observer: O,
        options: PumpOptions,
    ) -> Self {
        Self {
            subscription_id,
            store,
            serializer,
            clock,
            observer,
            options,
            throttle: Throttle::new(),
            phantom: PhantomData,
        }
    }

    /// Spawn the pump on the current runtime.
    pub fn spawn(self) -> SubscriptionHandle {
        let subscription_id = self.subscription_id;
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        SubscriptionHandle {
            subscription_id,
            token,
            task: Some(task),
        }
    }

    /// Deliver until `token` is cancelled or, under [FaultPolicy::Stop],
    /// the store fails.
    pub async fn run(mut self, token: CancellationToken) -> PumpExit {
        info!("Starting pump for subscription {}", self.subscription_id);
        let exit = loop {
            let error = match self.deliver_until_cancelled(&token).await {
                Ok(()) => break PumpExit::Cancelled,
                Err(error) => error,
            };
            self.observer.on_error(error.clone()).await;
            match self.options.fault_policy {
                FaultPolicy::Stop => {
                    error!(
                        "Pump for subscription {} faulted: {}",
                        self.subscription_id, error
                    );
                    break PumpExit::Faulted(error);
                }
                FaultPolicy::Restart { delay } => {
                    warn!(
                        "Pump for subscription {} faulted, restarting in {:?}: {}",
                        self.subscription_id, delay, error
                    );
                    if !sleep_unless_cancelled(delay, &token).await {
                        break PumpExit::Cancelled;
                    }
                    self.throttle.reset();
                }
            }
        };
        if exit.is_cancelled() {
            self.observer.on_completed().await;
        }
        info!("Pump for subscription {} stopped", self.subscription_id);
        exit
    }

    async fn deliver_until_cancelled(
        &mut self,
        token: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        while !token.is_cancelled() {
            // a dequeue dropped half way leaves at most a leased row,
            // which comes back when the lease lapses
            let dequeued = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = self.store.dequeue(self.subscription_id, self.clock.now()) => Some(result),
            };
            let Some(result) = dequeued else {
                break;
            };
            let mut reservation = result.map_err(DeliveryError::store)?;
            match reservation.item().cloned() {
                None => {
                    reservation.commit().await.map_err(DeliveryError::store)?;
                    if !sleep_unless_cancelled(self.throttle.delay(), token).await {
                        break;
                    }
                    self.throttle.back_off();
                }
                Some(item) => {
                    // once reserved, the item is seen through to commit
                    self.deliver(item, &mut reservation).await?;
                    self.throttle.reset();
                }
            }
        }
        Ok(())
    }

    async fn deliver(
        &mut self,
        item: SubscriptionQueueItem,
        reservation: &mut S::Reservation,
    ) -> Result<(), DeliveryError> {
        let outcome = match self
            .serializer
            .deserialize(&item.type_name, item.revision, &item.payload)
        {
            Ok(message) => self
                .observer
                .on_next(message)
                .await
                .map_err(|cause| DeliveryError::Handler {
                    message_id: item.message_id,
                    cause: Arc::from(cause),
                }),
            Err(cause) => Err(DeliveryError::Decode {
                message_id: item.message_id,
                type_name: item.type_name.clone(),
                revision: item.revision,
                cause: Arc::new(cause),
            }),
        };

        let failure = match outcome {
            Ok(()) => {
                reservation.commit().await.map_err(DeliveryError::store)?;
                debug!(
                    "Delivered message {} to subscription {}",
                    item.message_id, self.subscription_id
                );
                return Ok(());
            }
            Err(failure) => failure,
        };

        let attempts = item.dequeue_attempts.saturating_add(1);
        if self.options.is_poisoned(attempts) {
            reservation.commit().await.map_err(DeliveryError::store)?;
            warn!(
                "Dropping message {} from subscription {} after {} attempts",
                item.message_id, self.subscription_id, attempts
            );
            self.observer.on_error(failure).await;
            self.observer
                .on_error(DeliveryError::Poisoned {
                    message_id: item.message_id,
                    attempts,
                })
                .await;
        } else {
            reservation
                .redeliver(self.clock.now())
                .await
                .map_err(DeliveryError::store)?;
            debug!(
                "Message {} failed on attempt {}, redelivering: {}",
                item.message_id, attempts, failure
            );
            self.observer.on_error(failure).await;
        }
        Ok(())
    }
}

/// Returns false if the token was cancelled first.
async fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

/// Owns a running pump.
///
/// Call [unsubscribe](SubscriptionHandle::unsubscribe) to shut a pump down:
/// it returns once the in-flight message is finished and the pump has
/// released its store. Dropping the handle only cancels the pump; it keeps
/// running in the background until it notices.
#[derive(Debug)]
pub struct SubscriptionHandle {
    subscription_id: SubscriptionId,
    token: CancellationToken,
    task: Option<JoinHandle<PumpExit>>,
}

impl SubscriptionHandle {
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Ask the pump to stop. An item already reserved is still finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the pump task has ended, for whatever reason.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the pump to end without cancelling it.
    pub async fn join(mut self) -> PumpExit {
        let Some(task) = self.task.take() else {
            return PumpExit::Cancelled;
        };
        match task.await {
            Ok(exit) => exit,
            Err(e) if e.is_panic() => {
                error!(
                    "Pump for subscription {} panicked",
                    self.subscription_id
                );
                PumpExit::Panicked
            }
            Err(_) => PumpExit::Cancelled,
        }
    }

    /// Cancel the pump and wait for it to stop.
    pub async fn unsubscribe(self) -> PumpExit {
        self.cancel();
        self.join().await
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.token.cancel();
        }
    }
}
