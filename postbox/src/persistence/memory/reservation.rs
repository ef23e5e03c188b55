use chrono::{DateTime, Utc};
use tracing::warn;

use super::{
    error::MemoryStoreError,
    store::{lock, SharedState},
};
use crate::{
    model::SubscriptionQueueItem,
    persistence::{DequeueReservation, ReservationState},
};

/// An item taken out of its queue. Abandoning (or dropping) puts it back.
#[derive(Debug)]
pub struct MemoryReservation {
    item: Option<SubscriptionQueueItem>,
    /// Only set while the reservation is open.
    state: Option<SharedState>,
    status: ReservationState,
}

impl MemoryReservation {
    pub(super) fn reserved(item: SubscriptionQueueItem, state: SharedState) -> Self {
        Self {
            item: Some(item),
            state: Some(state),
            status: ReservationState::Reserved,
        }
    }

    pub(super) fn empty() -> Self {
        Self {
            item: None,
            state: None,
            status: ReservationState::Empty,
        }
    }

    fn rollback(&mut self) {
        if let (Some(state), Some(item)) = (self.state.take(), self.item.as_ref()) {
            lock(&state).restore(item.clone());
            self.status = ReservationState::Abandoned;
        }
    }
}

#[async_trait::async_trait]
impl DequeueReservation for MemoryReservation {
    type Error = MemoryStoreError;

    fn item(&self) -> Option<&SubscriptionQueueItem> {
        self.item.as_ref()
    }

    fn state(&self) -> ReservationState {
        self.status
    }

    async fn commit(&mut self) -> Result<(), Self::Error> {
        if self.state.take().is_some() {
            self.status = ReservationState::Committed;
        }
        Ok(())
    }

    async fn abandon(&mut self) -> Result<(), Self::Error> {
        self.rollback();
        Ok(())
    }

    async fn redeliver(&mut self, enqueue_time: DateTime<Utc>) -> Result<(), Self::Error> {
        let (Some(state), Some(item)) = (self.state.take(), self.item.as_ref()) else {
            return Ok(());
        };
        let redelivery = item.for_redelivery(enqueue_time);
        lock(&state).upsert(redelivery.subscription_id, redelivery.clone());
        self.item = Some(redelivery);
        self.status = ReservationState::Committed;
        Ok(())
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        if self.state.is_some() {
            if let Some(item) = &self.item {
                warn!(
                    "Reservation of message {} dropped without commit, rolling back",
                    item.message_id
                );
            }
            self.rollback();
        }
    }
}
