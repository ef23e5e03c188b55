use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// Raised by [fail_next](super::MemoryQueueStore::fail_next) to simulate
    /// a lost connection.
    #[error("store unavailable")]
    Unavailable,
}
