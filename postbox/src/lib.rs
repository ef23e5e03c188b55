//! # Postbox
//!
//! Postbox is a durable pub/sub transport built on top of a relational
//! store. A sender appends a message once; the store fans it out to the
//! private queue of every subscription; each subscriber runs an independent
//! pump which reserves, delivers and commits one message at a time.
//!
//! Delivery is at-least-once. A handler which fails, or a process which
//! dies half way through handling a message, sees the message again later.
//! Handlers are expected to be idempotent.
//!
//! ## Getting Started
//!
//! Describe the messages carried by a stream with a single type (usually an
//! enum) implementing [QueueMessage](serializer::QueueMessage), and build a
//! [TypeRegistry](serializer::TypeRegistry) mapping each stored type name
//! and revision back to it. Then share a store between a
//! [MessageSender] and a [MessageReceiver].
//!
//! ``` no_run
//! # use postbox::{MessageReceiver, MessageSender, Observer, SubscriptionId};
//! # use postbox::serializer::{ProstSerializer, QueueMessage, TypeRegistry};
//! # use postbox::sqlite::SqliteQueueStore;
//! # use std::sync::Arc;
//! # #[derive(Clone, PartialEq, prost::Message)]
//! # struct OrderPlaced { #[prost(string, tag = "1")] id: String }
//! # enum OrderEvent { Placed(OrderPlaced) }
//! # impl From<OrderPlaced> for OrderEvent { fn from(v: OrderPlaced) -> Self { OrderEvent::Placed(v) } }
//! # impl QueueMessage for OrderEvent {
//! #     fn type_name(&self) -> &'static str { "orders.OrderPlaced" }
//! #     fn encode_payload(&self) -> Vec<u8> { todo!() }
//! # }
//! # async fn inner(observer: impl Observer<OrderEvent>) {
//! let store = Arc::new(SqliteQueueStore::connect("sqlite://orders.db").await.unwrap());
//! let serializer = Arc::new(ProstSerializer::new(
//!     TypeRegistry::<OrderEvent>::new().register::<OrderPlaced>("orders.OrderPlaced", 1),
//! ));
//!
//! // consumers are identified by a stable name
//! let receiver = MessageReceiver::from_shared(Arc::clone(&store), Arc::clone(&serializer));
//! let handle = receiver
//!     .subscribe(SubscriptionId::from_name("billing"), observer, chrono::Utc::now())
//!     .await
//!     .unwrap();
//!
//! // every subscription gets its own copy
//! let sender = MessageSender::from_shared(store, serializer);
//! sender
//!     .send_one(OrderEvent::Placed(OrderPlaced { id: "o-1".into() }))
//!     .await
//!     .unwrap();
//!
//! // stop the pump; this waits for an in-flight message to finish
//! handle.unsubscribe().await;
//! # }
//! ```
//!
//! ## Crate feature flags
//!
//! - `sqlite`: A queue store backed by sqlite, with fan-out performed by
//! triggers. Enabled by default.
//! - `mocks`: Library local testing utilities.

pub(crate) mod constants;

pub mod clock;
mod model;
pub mod observer;
mod persistence;
pub mod proto;
pub mod pump;
mod receiver;
mod sender;
pub mod serializer;
pub mod throttle;
#[cfg(feature = "sqlite")]
mod util;

pub use model::{GlobalMessage, MessageId, NewMessage, SubscriptionId, SubscriptionQueueItem};
pub use observer::{DeliveryError, HandlerError, Observer};
pub use persistence::*;
pub use pump::{DeliveryPump, FaultPolicy, PumpExit, PumpOptions, SubscriptionHandle};
pub use receiver::MessageReceiver;
pub use sender::{DeliveryOptions, MessageSender, Outgoing, SendError};
