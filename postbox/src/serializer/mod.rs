//! Payloads are opaque to the queue. A [Serializer] turns an application
//! message into a type name, a revision and bytes on the way in, and back
//! on the way out.
//!
//! Decoding is driven by a [TypeResolver], a table keyed by
//! `(type_name, revision)` which is built once at startup. See
//! [TypeRegistry] and [ProstSerializer].

mod protobuf;
mod registry;

use std::error::Error;

use bytes::Bytes;
use thiserror::Error;

pub use protobuf::ProstSerializer;
pub use registry::{DecodeFn, TypeRegistry, TypeResolver};

/// The stored form of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedMessage {
    pub type_name: String,
    pub revision: i32,
    pub payload: Bytes,
}

pub trait Serializer<M>: Send + Sync + 'static {
    /// Failure mode of either direction.
    type Error: Error + Send + Sync + 'static;

    fn serialize(&self, message: &M) -> Result<SerializedMessage, Self::Error>;

    fn deserialize(&self, type_name: &str, revision: i32, payload: &[u8])
        -> Result<M, Self::Error>;
}

/// Implemented by application messages (usually an enum over every message
/// kind a stream carries) so they can describe and encode themselves.
pub trait QueueMessage: Send + 'static {
    /// The qualified type name stored alongside the payload.
    fn type_name(&self) -> &'static str;

    /// Schema version of the type.
    fn revision(&self) -> i32 {
        1
    }

    fn encode_payload(&self) -> Vec<u8>;
}

#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("no decoder registered for {type_name} revision {revision}")]
    UnknownType { type_name: String, revision: i32 },
    #[error("failed to decode payload: {0}")]
    Decode(#[from] prost::DecodeError),
}
