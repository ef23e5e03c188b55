//! Message types used by the crate's own tests, and by downstream test
//! suites through the `mocks` feature.

#[cfg(any(test, feature = "mocks"))]
pub mod ledger {
    use prost::Message;

    use crate::serializer::{ProstSerializer, QueueMessage, TypeRegistry};
    include!("./generated/ledger.rs");

    pub const ACCOUNT_OPENED: &str = "ledger.AccountOpened";
    pub const FUNDS_DEPOSITED: &str = "ledger.FundsDeposited";

    /// Everything published on the ledger stream.
    #[derive(Debug, Clone, PartialEq)]
    pub enum LedgerEvent {
        AccountOpened(AccountOpened),
        FundsDeposited(FundsDeposited),
    }

    impl LedgerEvent {
        pub fn account_id(&self) -> &str {
            match self {
                LedgerEvent::AccountOpened(e) => &e.account_id,
                LedgerEvent::FundsDeposited(e) => &e.account_id,
            }
        }
    }

    impl From<AccountOpened> for LedgerEvent {
        fn from(event: AccountOpened) -> Self {
            LedgerEvent::AccountOpened(event)
        }
    }

    impl From<FundsDeposited> for LedgerEvent {
        fn from(event: FundsDeposited) -> Self {
            LedgerEvent::FundsDeposited(event)
        }
    }

    impl QueueMessage for LedgerEvent {
        fn type_name(&self) -> &'static str {
            match self {
                LedgerEvent::AccountOpened(_) => ACCOUNT_OPENED,
                LedgerEvent::FundsDeposited(_) => FUNDS_DEPOSITED,
            }
        }

        fn encode_payload(&self) -> Vec<u8> {
            match self {
                LedgerEvent::AccountOpened(e) => e.encode_to_vec(),
                LedgerEvent::FundsDeposited(e) => e.encode_to_vec(),
            }
        }
    }

    pub fn ledger_serializer() -> ProstSerializer<LedgerEvent> {
        ProstSerializer::new(
            TypeRegistry::new()
                .register::<AccountOpened>(ACCOUNT_OPENED, 1)
                .register::<FundsDeposited>(FUNDS_DEPOSITED, 1),
        )
    }

    pub fn opened(account_id: &str) -> LedgerEvent {
        AccountOpened {
            account_id: account_id.to_string(),
            owner: format!("owner of {account_id}"),
        }
        .into()
    }

    pub fn deposited(account_id: &str, amount: i64) -> LedgerEvent {
        FundsDeposited {
            account_id: account_id.to_string(),
            amount,
        }
        .into()
    }
}
