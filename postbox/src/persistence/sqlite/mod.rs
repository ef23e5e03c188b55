mod error;
mod reservation;
mod store;

pub use error::SqlError;
pub use reservation::SqliteReservation;
pub use store::SqliteQueueStore;
