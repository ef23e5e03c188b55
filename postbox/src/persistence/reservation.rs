//! A [DequeueReservation] owns the hold a dequeue takes on one queue row.
//! It is the only way to finish that hold, so every exit path either
//! removes the row or gives it back.

use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::SubscriptionQueueItem;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReservationState {
    /// Nothing was due. There is nothing to finish.
    Empty,
    /// An item is held.
    Reserved,
    /// The removal of the item is durable.
    Committed,
    /// The item is queued again as it was, or the hold had already been
    /// lost (e.g. a lapsed lease) and the row belongs to someone else.
    Abandoned,
}

/// An exclusive hold on a single queue row.
///
/// Once a reservation has left [ReservationState::Reserved], further calls
/// to `commit`, `abandon` or `redeliver` do nothing. Dropping a reserved
/// reservation abandons it.
#[async_trait]
pub trait DequeueReservation: Send + 'static {
    /// An error occurring from an operation.
    type Error: Error + Send + Sync + 'static;

    /// The reserved item, or None for an empty reservation.
    fn item(&self) -> Option<&SubscriptionQueueItem>;

    fn state(&self) -> ReservationState;

    fn is_empty(&self) -> bool {
        self.state() == ReservationState::Empty
    }

    /// Make the removal of the item durable.
    async fn commit(&mut self) -> Result<(), Self::Error>;

    /// Give the item back as though it was never reserved.
    async fn abandon(&mut self) -> Result<(), Self::Error>;

    /// Replace the item with a fresh copy (one more dequeue attempt,
    /// enqueued at `enqueue_time`) and release it, as one atomic step.
    async fn redeliver(&mut self, enqueue_time: DateTime<Utc>) -> Result<(), Self::Error>;
}
