use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::{
    clock::{Clock, SystemClock},
    model::SubscriptionId,
    observer::{DeliveryError, Observer},
    persistence::MessageQueueStore,
    pump::{DeliveryPump, PumpOptions, SubscriptionHandle},
    serializer::Serializer,
};

/// Starts a [DeliveryPump] per subscription.
///
/// ``` no_run
/// # use postbox::{DeliveryError, HandlerError, MessageReceiver, Observer, SubscriptionId};
/// # use postbox::serializer::Serializer;
/// # use postbox::sqlite::SqliteQueueStore;
/// # struct Event;
/// struct Projection;
///
/// #[async_trait::async_trait]
/// impl Observer<Event> for Projection {
///     async fn on_next(&mut self, event: Event) -> Result<(), HandlerError> {
///         // update the read model
///         Ok(())
///     }
///
///     async fn on_error(&mut self, error: DeliveryError) {}
///
///     async fn on_completed(&mut self) {}
/// }
///
/// # async fn inner(serializer: impl Serializer<Event>) {
/// let store = SqliteQueueStore::connect("sqlite://ledger.db").await.unwrap();
/// let receiver = MessageReceiver::new(store, serializer);
/// // replay the last hour, then follow new messages
/// let from = chrono::Utc::now() - chrono::Duration::hours(1);
/// let handle = receiver
///     .subscribe(SubscriptionId::from_name("projections"), Projection, from)
///     .await
///     .unwrap();
/// // ...
/// handle.unsubscribe().await;
/// # }
/// ```
pub struct MessageReceiver<S, Z> {
    store: Arc<S>,
    serializer: Arc<Z>,
    clock: Arc<dyn Clock>,
    options: PumpOptions,
}

impl<S: MessageQueueStore, Z> MessageReceiver<S, Z> {
    pub fn new(store: S, serializer: Z) -> Self {
        Self::from_shared(Arc::new(store), Arc::new(serializer))
    }

    /// Share a store and serializer with a sender or another receiver.
    pub fn from_shared(store: Arc<S>, serializer: Arc<Z>) -> Self {
        Self {
            store,
            serializer,
            clock: Arc::new(SystemClock),
            options: PumpOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Options for every pump started afterwards.
    pub fn with_options(mut self, options: PumpOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create the subscription unless it exists, then start delivering to
    /// `observer`. A new subscription is backfilled with every logged
    /// message enqueued at or after `from`; for an existing one `from` is
    /// ignored.
    ///
    /// Failing to create the subscription is reported to the observer as
    /// well as returned.
    pub async fn subscribe<M, O>(
        &self,
        subscription_id: SubscriptionId,
        mut observer: O,
        from: DateTime<Utc>,
    ) -> Result<SubscriptionHandle, DeliveryError>
    where
        M: Send + 'static,
        Z: Serializer<M>,
        O: Observer<M>,
    {
        match self.store.create_subscription(subscription_id, from).await {
            Ok(true) => debug!("Created subscription {} from {}", subscription_id, from),
            Ok(false) => debug!("Resuming subscription {}", subscription_id),
            Err(e) => {
                error!("Failed to create subscription {}: {}", subscription_id, e);
                let error = DeliveryError::store(e);
                observer.on_error(error.clone()).await;
                return Err(error);
            }
        }
        let pump = DeliveryPump::new(
            subscription_id,
            Arc::clone(&self.store),
            Arc::clone(&self.serializer),
            Arc::clone(&self.clock),
            observer,
            self.options.clone(),
        );
        Ok(pump.spawn())
    }

    /// Stop tracking a subscription and drop everything still queued for
    /// it. The pump should be stopped first.
    pub async fn delete_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<bool, DeliveryError> {
        self.store
            .delete_subscription(subscription_id)
            .await
            .map_err(DeliveryError::store)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::{
        clock::ManualClock,
        observer::{ObserverEvent, RecordingObserver},
        persistence::memory::MemoryQueueStore,
        proto::ledger::{ledger_serializer, opened, LedgerEvent},
        sender::{DeliveryOptions, MessageSender, Outgoing},
    };

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn subscribe_replays_history() {
        let store = Arc::new(MemoryQueueStore::new());
        let serializer = Arc::new(ledger_serializer());
        let sender = MessageSender::from_shared(Arc::clone(&store), Arc::clone(&serializer));
        let receiver = MessageReceiver::from_shared(store, serializer);

        // published before anyone listens
        sender.send_one(opened("acc-1")).await.unwrap();

        let observer = RecordingObserver::<LedgerEvent>::new();
        let handle = receiver
            .subscribe(
                SubscriptionId::from_name("replay"),
                observer.clone(),
                Utc::now() - chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert!(observer.wait_until(WAIT, |events| events.len() == 1).await);
        assert_eq!(observer.messages(), vec![opened("acc-1")]);
        assert!(handle.unsubscribe().await.is_cancelled());
    }

    #[tokio::test]
    async fn subscribe_from_now_skips_history() {
        let store = Arc::new(MemoryQueueStore::new());
        let serializer = Arc::new(ledger_serializer());
        let sender = MessageSender::from_shared(Arc::clone(&store), Arc::clone(&serializer));
        let receiver = MessageReceiver::from_shared(Arc::clone(&store), serializer);

        sender.send_one(opened("old")).await.unwrap();
        let subscription_id = SubscriptionId::generate();
        let observer = RecordingObserver::<LedgerEvent>::new();
        let handle = receiver
            .subscribe(
                subscription_id,
                observer.clone(),
                Utc::now() + chrono::Duration::milliseconds(1),
            )
            .await
            .unwrap();
        assert_eq!(store.queue_depth(subscription_id).await.unwrap(), 0);
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn subscribe_reports_store_failure() {
        let store = MemoryQueueStore::new();
        store.fail_next(1);
        let receiver = MessageReceiver::new(store, ledger_serializer());
        let observer = RecordingObserver::<LedgerEvent>::new();
        let result = receiver
            .subscribe(SubscriptionId::generate(), observer.clone(), Utc::now())
            .await;
        assert!(matches!(result, Err(DeliveryError::Store(_))));
        assert!(matches!(
            observer.events().as_slice(),
            [ObserverEvent::Error(DeliveryError::Store(_))]
        ));
    }

    #[tokio::test]
    async fn delayed_message_waits_for_clock() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(MemoryQueueStore::new());
        let serializer = Arc::new(ledger_serializer());
        let sender = MessageSender::from_shared(Arc::clone(&store), Arc::clone(&serializer))
            .with_clock(clock.clone());
        let receiver =
            MessageReceiver::from_shared(store, serializer).with_clock(clock.clone());

        let observer = RecordingObserver::<LedgerEvent>::new();
        let handle = receiver
            .subscribe(SubscriptionId::generate(), observer.clone(), start)
            .await
            .unwrap();
        sender
            .send(vec![Outgoing::new(opened("later"))
                .with_options(DeliveryOptions::delayed(chrono::Duration::minutes(5)))])
            .await
            .unwrap();

        assert!(
            !observer
                .wait_until(Duration::from_millis(300), |events| !events.is_empty())
                .await
        );
        clock.advance(chrono::Duration::minutes(5));
        assert!(observer.wait_until(WAIT, |events| events.len() == 1).await);
        handle.unsubscribe().await;
    }
}
