use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::SqlError;
use crate::{
    model::{MessageId, SubscriptionId, SubscriptionQueueItem},
    persistence::{DequeueReservation, ReservationState},
    util::to_nanos,
};

/// The claim a reservation holds on its queue row. Every statement is
/// guarded by the token, so a holder whose lease has lapsed and been taken
/// over can no longer touch the row.
#[derive(Debug)]
pub(super) struct Lease {
    pool: SqlitePool,
    subscription_id: SubscriptionId,
    message_id: MessageId,
    token: Uuid,
}

impl Lease {
    pub(super) fn new(
        pool: SqlitePool,
        subscription_id: SubscriptionId,
        message_id: MessageId,
        token: Uuid,
    ) -> Self {
        Self {
            pool,
            subscription_id,
            message_id,
            token,
        }
    }

    /// Delete the row. Returns false if the lease was no longer held.
    async fn complete(&self) -> Result<bool, SqlError> {
        let result = sqlx::query(
            r#"
                DELETE FROM subscription_queue
                WHERE subscription_id = ?1
                  AND message_id = ?2
                  AND reservation_token = ?3
            "#,
        )
        .bind(self.subscription_id.as_bytes().as_slice())
        .bind(self.message_id.as_bytes().as_slice())
        .bind(self.token.as_bytes().as_slice())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Make the row available again, unchanged.
    async fn release(&self) -> Result<bool, SqlError> {
        let result = sqlx::query(
            r#"
                UPDATE subscription_queue
                SET reservation_token = NULL,
                    reserved_until    = NULL
                WHERE subscription_id = ?1
                  AND message_id = ?2
                  AND reservation_token = ?3
            "#,
        )
        .bind(self.subscription_id.as_bytes().as_slice())
        .bind(self.message_id.as_bytes().as_slice())
        .bind(self.token.as_bytes().as_slice())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the row with `redelivery` and make it available again, in a
    /// single statement.
    async fn replace(&self, redelivery: &SubscriptionQueueItem) -> Result<bool, SqlError> {
        let result = sqlx::query(
            r#"
                UPDATE subscription_queue
                SET enqueue_time      = ?4,
                    dequeue_attempts  = ?5,
                    reservation_token = NULL,
                    reserved_until    = NULL
                WHERE subscription_id = ?1
                  AND message_id = ?2
                  AND reservation_token = ?3
            "#,
        )
        .bind(self.subscription_id.as_bytes().as_slice())
        .bind(self.message_id.as_bytes().as_slice())
        .bind(self.token.as_bytes().as_slice())
        .bind(to_nanos(redelivery.enqueue_time))
        .bind(redelivery.dequeue_attempts)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// A leased queue row. The claim itself is committed by the dequeue, so no
/// transaction (and no database lock) is held while the item is handled.
///
/// Dropping the reservation unfinished releases the row in the background.
/// If that never happens (e.g. the process dies) the row becomes available
/// again once its lease runs out.
pub struct SqliteReservation {
    item: Option<SubscriptionQueueItem>,
    lease: Option<Lease>,
    state: ReservationState,
}

impl SqliteReservation {
    pub(super) fn reserved(item: SubscriptionQueueItem, lease: Lease) -> Self {
        Self {
            item: Some(item),
            lease: Some(lease),
            state: ReservationState::Reserved,
        }
    }

    pub(super) fn empty() -> Self {
        Self {
            item: None,
            lease: None,
            state: ReservationState::Empty,
        }
    }
}

fn lease_lost(message_id: MessageId) {
    warn!(
        "Lease on message {} lapsed before the reservation finished",
        message_id
    );
}

#[async_trait::async_trait]
impl DequeueReservation for SqliteReservation {
    type Error = SqlError;

    fn item(&self) -> Option<&SubscriptionQueueItem> {
        self.item.as_ref()
    }

    fn state(&self) -> ReservationState {
        self.state
    }

    async fn commit(&mut self) -> Result<(), Self::Error> {
        if let Some(lease) = self.lease.take() {
            // a failed delete leaves the row leased until it lapses
            self.state = ReservationState::Abandoned;
            if lease.complete().await? {
                self.state = ReservationState::Committed;
            } else {
                lease_lost(lease.message_id);
            }
        }
        Ok(())
    }

    async fn abandon(&mut self) -> Result<(), Self::Error> {
        if let Some(lease) = self.lease.take() {
            self.state = ReservationState::Abandoned;
            if !lease.release().await? {
                lease_lost(lease.message_id);
            }
        }
        Ok(())
    }

    async fn redeliver(&mut self, enqueue_time: DateTime<Utc>) -> Result<(), Self::Error> {
        let (Some(lease), Some(item)) = (self.lease.take(), self.item.as_ref()) else {
            return Ok(());
        };
        self.state = ReservationState::Abandoned;
        let redelivery = item.for_redelivery(enqueue_time);
        if !lease.replace(&redelivery).await? {
            lease_lost(lease.message_id);
            return Ok(());
        }
        self.item = Some(redelivery);
        self.state = ReservationState::Committed;
        Ok(())
    }
}

impl Drop for SqliteReservation {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        warn!(
            "Reservation of message {} dropped without commit, releasing",
            lease.message_id
        );
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lease.release().await {
                        warn!(
                            "Failed to release message {}, it returns when the lease lapses: {}",
                            lease.message_id, e
                        );
                    }
                });
            }
            Err(_) => debug!(
                "No runtime to release message {}, it returns when the lease lapses",
                lease.message_id
            ),
        }
    }
}
