use std::marker::PhantomData;

use bytes::Bytes;

use super::{
    registry::{TypeRegistry, TypeResolver},
    QueueMessage, SerializedMessage, Serializer, SerializerError,
};

/// Protobuf payloads. Encoding is left to the message itself, decoding is
/// looked up in a [TypeResolver].
pub struct ProstSerializer<M, R = TypeRegistry<M>> {
    resolver: R,
    phantom: PhantomData<fn() -> M>,
}

impl<M, R: TypeResolver<M>> ProstSerializer<M, R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            phantom: PhantomData,
        }
    }
}

impl<M, R> Serializer<M> for ProstSerializer<M, R>
where
    M: QueueMessage,
    R: TypeResolver<M>,
{
    type Error = SerializerError;

    fn serialize(&self, message: &M) -> Result<SerializedMessage, Self::Error> {
        Ok(SerializedMessage {
            type_name: message.type_name().to_string(),
            revision: message.revision(),
            payload: Bytes::from(message.encode_payload()),
        })
    }

    fn deserialize(
        &self,
        type_name: &str,
        revision: i32,
        payload: &[u8],
    ) -> Result<M, Self::Error> {
        let decode = self
            .resolver
            .resolve(type_name, revision)
            .ok_or_else(|| SerializerError::UnknownType {
                type_name: type_name.to_string(),
                revision,
            })?;
        Ok(decode(payload)?)
    }
}
