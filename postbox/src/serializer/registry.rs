use std::collections::HashMap;

use prost::{DecodeError, Message};

/// Decodes the payload of one registered type into the stream's message
/// type.
pub type DecodeFn<M> = fn(&[u8]) -> Result<M, DecodeError>;

/// Maps a stored type name and revision to a decoder.
pub trait TypeResolver<M>: Send + Sync + 'static {
    fn resolve(&self, type_name: &str, revision: i32) -> Option<DecodeFn<M>>;
}

/// A static dispatch table. Built once, then only read.
///
/// ``` no_run
/// # use postbox::serializer::TypeRegistry;
/// # #[derive(Clone, PartialEq, prost::Message)]
/// # struct AccountOpened {}
/// # #[derive(Clone, PartialEq, prost::Message)]
/// # struct AccountOpenedV2 {}
/// # enum Event { Opened(AccountOpenedV2) }
/// # impl From<AccountOpened> for Event { fn from(_: AccountOpened) -> Self { todo!() } }
/// # impl From<AccountOpenedV2> for Event { fn from(v: AccountOpenedV2) -> Self { Event::Opened(v) } }
/// let registry = TypeRegistry::<Event>::new()
///     .register::<AccountOpened>("ledger.AccountOpened", 1)
///     .register::<AccountOpenedV2>("ledger.AccountOpened", 2);
/// ```
pub struct TypeRegistry<M> {
    decoders: HashMap<(String, i32), DecodeFn<M>>,
}

impl<M: 'static> TypeRegistry<M> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register `T` as the shape of `type_name` at `revision`. Registering
    /// the same key again replaces the previous entry.
    pub fn register<T>(mut self, type_name: &str, revision: i32) -> Self
    where
        T: Message + Default + Into<M>,
    {
        self.decoders
            .insert((type_name.to_string(), revision), decode_into::<T, M>);
        self
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl<M: 'static> Default for TypeRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> TypeResolver<M> for TypeRegistry<M> {
    fn resolve(&self, type_name: &str, revision: i32) -> Option<DecodeFn<M>> {
        self.decoders
            .get(&(type_name.to_string(), revision))
            .copied()
    }
}

fn decode_into<T, M>(buf: &[u8]) -> Result<M, DecodeError>
where
    T: Message + Default + Into<M>,
{
    T::decode(buf).map(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ledger::{AccountOpened, FundsDeposited, LedgerEvent};

    #[test]
    fn test_register_replaces() {
        let registry = TypeRegistry::<LedgerEvent>::new()
            .register::<AccountOpened>("ledger.Event", 1)
            .register::<FundsDeposited>("ledger.Event", 1)
            .register::<AccountOpened>("ledger.Event", 2);
        assert_eq!(registry.len(), 2);

        let payload = FundsDeposited {
            account_id: "acc-1".to_string(),
            amount: 7,
        }
        .encode_to_vec();
        let decode = registry.resolve("ledger.Event", 1).unwrap();
        assert!(matches!(
            decode(&payload).unwrap(),
            LedgerEvent::FundsDeposited(_)
        ));
        assert!(registry.resolve("ledger.Event", 3).is_none());
        assert!(TypeRegistry::<LedgerEvent>::default().is_empty());
    }
}
