pub mod orders;

pub mod proto {
    pub mod orders {
        include!("./generated/orders.rs");
    }
}
