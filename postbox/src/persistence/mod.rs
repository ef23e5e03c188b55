//! # Durable queues on top of a relational store
//!
//! Postbox keeps three collections:
//!
//! - the **global log** (`message_queue`): every published message, written
//! once by a sender.
//! - the **subscriptions** (`subscription`): one row per consumer stream.
//! - the **subscription queues** (`subscription_queue`): a private copy of
//! each undelivered message for each subscription.
//!
//! ## Fan-out
//!
//! Enqueueing a message copies it into every existing subscription's queue
//! in the same transaction as the insert into the global log. A new
//! subscription backfills its queue from the global log, starting at its
//! creation time. The two paths never both deliver a message to the same
//! subscription, and never both miss it.
//!
//! ## Reservations
//!
//! Consumers take items with [dequeue](MessageQueueStore::dequeue), which
//! withholds the row from every other consumer and hands back a
//! [DequeueReservation]. Committing the reservation removes the row;
//! abandoning it (or simply dropping it, e.g. when the consumer crashes)
//! gives the row back. This gives at-least-once delivery without any
//! application code.
//!
//! Reservations don't lock anything but their own row. Pumps of different
//! subscriptions, senders, and a handler publishing from inside `on_next`
//! all proceed while a reservation is held.
//!
//! ## Backends
//!
//! - [sqlite]: fan-out and backfill are triggers inside the inserting
//! statement, and a reservation is a lease on its row which lapses if the
//! consumer dies. Enabled by the `sqlite` feature.
//! - [memory]: an in-process store performing the same steps explicitly
//! under a single lock.

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod memory;

mod queue_store;
mod reservation;

pub use queue_store::MessageQueueStore;
pub use reservation::{DequeueReservation, ReservationState};
