use std::{sync::Arc, time::Duration};

use demos::orders::{orders_serializer, OrderGenerator};
use postbox::{sqlite::SqliteQueueStore, DeliveryOptions, MessageSender, Outgoing};
use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // share this file with the subscriber
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://orders.db".to_string());

    let store = SqliteQueueStore::connect(&database_url).await.unwrap();
    let sender = MessageSender::from_shared(Arc::new(store), Arc::new(orders_serializer()));
    let mut generator = OrderGenerator::new();

    let mut sent = 0u64;
    loop {
        let event = generator.next_event();
        // every tenth order is held back for a few seconds
        let options = if sent % 10 == 9 {
            DeliveryOptions::delayed(chrono::Duration::seconds(5))
        } else {
            DeliveryOptions::default()
        };
        let message_id = sender
            .send_with(Outgoing::new(event).with_options(options))
            .await
            .unwrap();
        sent += 1;

        if sent % 100 == 0 {
            info!("Sent {} messages, last {}", sent, message_id);
        }

        sleep(Duration::from_millis(20)).await;
    }
}
