#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderPlaced {
    #[prost(string, required, tag="1")]
    pub order_id: ::prost::alloc::string::String,
    #[prost(string, required, tag="2")]
    pub customer: ::prost::alloc::string::String,
    #[prost(uint32, required, tag="3")]
    pub quantity: u32,
    /// / Price per unit in cents.
    #[prost(uint32, required, tag="4")]
    pub unit_price: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderCancelled {
    #[prost(string, required, tag="1")]
    pub order_id: ::prost::alloc::string::String,
    #[prost(string, optional, tag="2")]
    pub reason: ::core::option::Option<::prost::alloc::string::String>,
}
