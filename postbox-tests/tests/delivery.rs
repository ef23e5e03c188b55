mod common;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use common::{test_db, WAIT};
use postbox::{
    observer::{ObserverEvent, RecordingObserver},
    proto::ledger::{deposited, ledger_serializer, opened, LedgerEvent},
    serializer::ProstSerializer,
    sqlite::SqliteQueueStore,
    DeliveryError, DequeueReservation, HandlerError, MessageQueueStore, MessageReceiver,
    MessageSender, Observer, SubscriptionId,
};
use rand::seq::SliceRandom;

type LedgerSender = MessageSender<LedgerEvent, SqliteQueueStore, ProstSerializer<LedgerEvent>>;

/// Credits every newly opened account, publishing the deposit from inside
/// the handler.
struct WelcomeBonus {
    sender: Arc<LedgerSender>,
    recorder: RecordingObserver<LedgerEvent>,
}

#[async_trait]
impl Observer<LedgerEvent> for WelcomeBonus {
    async fn on_next(&mut self, message: LedgerEvent) -> Result<(), HandlerError> {
        if let LedgerEvent::AccountOpened(account) = &message {
            self.sender
                .send_one(deposited(&account.account_id, 100))
                .await?;
        }
        self.recorder.on_next(message).await
    }

    async fn on_error(&mut self, error: DeliveryError) {
        self.recorder.on_error(error).await
    }

    async fn on_completed(&mut self) {
        self.recorder.on_completed().await
    }
}

#[tokio::test]
async fn handler_failure_is_redelivered_once_then_drained() -> anyhow::Result<()> {
    let db = test_db().await?;
    let store = Arc::new(db.store.clone());
    let serializer = Arc::new(ledger_serializer());
    let sender = MessageSender::from_shared(Arc::clone(&store), Arc::clone(&serializer));
    let receiver = MessageReceiver::from_shared(Arc::clone(&store), serializer);

    // M1 is published before any subscription exists
    let m1 = opened("acc-1");
    let m1_id = sender.send_one(m1.clone()).await?;

    let s1 = SubscriptionId::from_name("s1");
    let observer = RecordingObserver::<LedgerEvent>::new();
    observer.fail_next(1);
    let handle = receiver
        .subscribe(
            s1,
            observer.clone(),
            Utc::now() - chrono::Duration::hours(1),
        )
        .await?;

    assert!(observer.wait_until(WAIT, |events| events.len() == 3).await);
    let events = observer.events();
    assert!(matches!(&events[0], ObserverEvent::Next(m) if *m == m1));
    assert!(matches!(
        &events[1],
        ObserverEvent::Error(DeliveryError::Handler { message_id, .. }) if *message_id == m1_id
    ));
    assert!(matches!(&events[2], ObserverEvent::Next(m) if *m == m1));

    assert!(handle.unsubscribe().await.is_cancelled());
    assert_eq!(store.queue_depth(s1).await?, 0);
    assert_eq!(observer.completions(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_item_reappears_with_one_attempt() -> anyhow::Result<()> {
    let db = test_db().await?;
    let store = &db.store;
    let serializer = ledger_serializer();
    let sender = MessageSender::from_shared(Arc::new(store.clone()), Arc::new(serializer));
    let m1_id = sender.send_one(opened("acc-1")).await?;

    let s1 = SubscriptionId::generate();
    store
        .create_subscription(s1, Utc::now() - chrono::Duration::hours(1))
        .await?;

    // what the pump does when the handler fails
    let mut reservation = store.dequeue(s1, Utc::now()).await?;
    assert_eq!(reservation.item().map(|i| i.dequeue_attempts), Some(0));
    reservation.redeliver(Utc::now()).await?;

    let mut reservation = store.dequeue(s1, Utc::now()).await?;
    let item = reservation.item().cloned().expect("redelivered item");
    assert_eq!(item.message_id, m1_id);
    assert_eq!(item.dequeue_attempts, 1);
    reservation.commit().await?;
    assert_eq!(store.queue_depth(s1).await?, 0);
    Ok(())
}

#[tokio::test]
async fn crashed_consumer_leaves_message_for_the_next() -> anyhow::Result<()> {
    let db = test_db().await?;
    let store = Arc::new(db.store.clone());
    let serializer = Arc::new(ledger_serializer());
    let sender = MessageSender::from_shared(Arc::clone(&store), Arc::clone(&serializer));
    let receiver = MessageReceiver::from_shared(Arc::clone(&store), serializer);

    let subscription_id = SubscriptionId::from_name("projections");
    store
        .create_subscription(subscription_id, Utc::now())
        .await?;
    sender.send_one(deposited("acc-9", 900)).await?;

    // reserved, then the process dies before committing
    {
        let reservation = store.dequeue(subscription_id, Utc::now()).await?;
        assert!(!reservation.is_empty());
    }

    let observer = RecordingObserver::<LedgerEvent>::new();
    let handle = receiver
        .subscribe(subscription_id, observer.clone(), Utc::now())
        .await?;
    assert!(observer.wait_until(WAIT, |events| events.len() == 1).await);
    assert_eq!(observer.messages(), vec![deposited("acc-9", 900)]);
    handle.unsubscribe().await;
    Ok(())
}

#[tokio::test]
async fn every_subscription_gets_every_message() -> anyhow::Result<()> {
    let db = test_db().await?;
    let store = Arc::new(db.store.clone());
    let serializer = Arc::new(ledger_serializer());
    let sender = MessageSender::from_shared(Arc::clone(&store), Arc::clone(&serializer));
    let receiver = MessageReceiver::from_shared(Arc::clone(&store), serializer);

    let mut handles = Vec::new();
    let mut observers = Vec::new();
    for name in ["billing", "audit", "search"] {
        let observer = RecordingObserver::<LedgerEvent>::new();
        handles.push(
            receiver
                .subscribe(SubscriptionId::from_name(name), observer.clone(), Utc::now())
                .await?,
        );
        observers.push(observer);
    }

    let mut events: Vec<_> = (0..10)
        .map(|i| deposited(&format!("acc-{}", i % 3), i))
        .collect();
    events.shuffle(&mut rand::thread_rng());
    for event in events.iter() {
        sender.send_one(event.clone()).await?;
    }

    let expected: i64 = (0..10).sum();
    for observer in observers.iter() {
        assert!(observer.wait_until(WAIT, |events| events.len() == 10).await);
        let mut totals: HashMap<String, i64> = HashMap::new();
        for message in observer.messages() {
            if let LedgerEvent::FundsDeposited(deposit) = message {
                *totals.entry(deposit.account_id).or_default() += deposit.amount;
            }
        }
        assert_eq!(totals.values().sum::<i64>(), expected);
        assert!(observer.errors().is_empty());
    }

    for handle in handles {
        assert!(handle.unsubscribe().await.is_cancelled());
    }
    Ok(())
}

#[tokio::test]
async fn resubscribing_by_name_resumes_the_queue() -> anyhow::Result<()> {
    let db = test_db().await?;
    let store = Arc::new(db.store.clone());
    let serializer = Arc::new(ledger_serializer());
    let sender = MessageSender::from_shared(Arc::clone(&store), Arc::clone(&serializer));
    let receiver = MessageReceiver::from_shared(Arc::clone(&store), serializer);
    let subscription_id = SubscriptionId::from_name("reporting");

    let first = RecordingObserver::<LedgerEvent>::new();
    let handle = receiver
        .subscribe(subscription_id, first.clone(), Utc::now())
        .await?;
    sender.send_one(opened("acc-1")).await?;
    assert!(first.wait_until(WAIT, |events| events.len() == 1).await);
    handle.unsubscribe().await;

    // published while nobody is listening
    sender.send_one(opened("acc-2")).await?;
    assert_eq!(store.queue_depth(subscription_id).await?, 1);

    let second = RecordingObserver::<LedgerEvent>::new();
    let handle = receiver
        .subscribe(subscription_id, second.clone(), Utc::now())
        .await?;
    assert!(second.wait_until(WAIT, |events| events.len() == 1).await);
    assert_eq!(second.messages(), vec![opened("acc-2")]);
    handle.unsubscribe().await;

    assert!(receiver.delete_subscription(subscription_id).await?);
    Ok(())
}

#[tokio::test]
async fn handler_can_publish_while_other_subscriptions_deliver() -> anyhow::Result<()> {
    let db = test_db().await?;
    let store = Arc::new(db.store.clone());
    let serializer = Arc::new(ledger_serializer());
    let sender = Arc::new(MessageSender::from_shared(
        Arc::clone(&store),
        Arc::clone(&serializer),
    ));
    let receiver = MessageReceiver::from_shared(Arc::clone(&store), serializer);

    let bonus = RecordingObserver::<LedgerEvent>::new();
    let bonus_handle = receiver
        .subscribe(
            SubscriptionId::from_name("welcome-bonus"),
            WelcomeBonus {
                sender: Arc::clone(&sender),
                recorder: bonus.clone(),
            },
            Utc::now(),
        )
        .await?;
    let audit = RecordingObserver::<LedgerEvent>::new();
    let audit_handle = receiver
        .subscribe(SubscriptionId::from_name("audit"), audit.clone(), Utc::now())
        .await?;

    for account in ["acc-1", "acc-2", "acc-3"] {
        sender.send_one(opened(account)).await?;
    }

    // three openings plus the three deposits published by the handler
    assert!(bonus.wait_until(WAIT, |events| events.len() == 6).await);
    assert!(audit.wait_until(WAIT, |events| events.len() == 6).await);
    assert!(bonus.errors().is_empty());
    assert!(audit.errors().is_empty());
    let deposits: i64 = audit
        .messages()
        .iter()
        .filter_map(|message| match message {
            LedgerEvent::FundsDeposited(deposit) => Some(deposit.amount),
            _ => None,
        })
        .sum();
    assert_eq!(deposits, 300);

    assert!(bonus_handle.unsubscribe().await.is_cancelled());
    assert!(audit_handle.unsubscribe().await.is_cancelled());
    Ok(())
}
