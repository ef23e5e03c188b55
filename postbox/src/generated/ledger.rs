/// / A new account was opened.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AccountOpened {
    /// / Unique account id.
    #[prost(string, tag="1")]
    pub account_id: ::prost::alloc::string::String,
    /// / Name of the account holder.
    #[prost(string, tag="2")]
    pub owner: ::prost::alloc::string::String,
}
/// / Money was paid into an account.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FundsDeposited {
    #[prost(string, tag="1")]
    pub account_id: ::prost::alloc::string::String,
    /// / Amount in minor units.
    #[prost(int64, tag="2")]
    pub amount: i64,
}
