use std::time::Duration;

use demos::orders::{orders_serializer, OrderEvent, RevenueProjection};
use postbox::{
    sqlite::SqliteQueueStore, DeliveryError, FaultPolicy, HandlerError, MessageReceiver,
    Observer, PumpOptions, SubscriptionId,
};
use tracing::{info, warn};

struct Revenue {
    projection: RevenueProjection,
    handled: u64,
}

#[async_trait::async_trait]
impl Observer<OrderEvent> for Revenue {
    async fn on_next(&mut self, event: OrderEvent) -> Result<(), HandlerError> {
        self.projection.apply(&event);
        self.handled += 1;
        if self.handled % 100 == 0 {
            info!(
                "Handled {} ({} open orders) Revenue: {}",
                self.handled,
                self.projection.open_orders(),
                self.projection
            );
        }
        Ok(())
    }

    async fn on_error(&mut self, error: DeliveryError) {
        warn!("Delivery error: {}", error);
    }

    async fn on_completed(&mut self) {
        info!("Done. Revenue: {}", self.projection);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://orders.db".to_string());
    let name = std::env::var("SUBSCRIPTION").unwrap_or_else(|_| "revenue".to_string());

    let store = SqliteQueueStore::connect(&database_url).await.unwrap();
    let options = PumpOptions::default()
        .with_max_dequeue_attempts(5)
        .with_fault_policy(FaultPolicy::Restart {
            delay: Duration::from_secs(1),
        });
    let receiver = MessageReceiver::new(store, orders_serializer()).with_options(options);

    let observer = Revenue {
        projection: RevenueProjection::default(),
        handled: 0,
    };
    // a new subscription replays the last ten minutes
    let from = chrono::Utc::now() - chrono::Duration::minutes(10);
    let handle = receiver
        .subscribe(SubscriptionId::from_name(&name), observer, from)
        .await
        .unwrap();
    info!("Subscribed as {} ({})", name, handle.subscription_id());

    tokio::signal::ctrl_c().await.unwrap();
    let exit = handle.unsubscribe().await;
    info!("Pump stopped: {:?}", exit);
}
