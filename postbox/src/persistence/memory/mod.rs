mod error;
mod reservation;
mod store;

pub use error::MemoryStoreError;
pub use reservation::MemoryReservation;
pub use store::MemoryQueueStore;
