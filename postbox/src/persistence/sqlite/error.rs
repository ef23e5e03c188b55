use thiserror::Error;

/// Newtype around [sqlx::Error]
#[derive(Debug, Error)]
#[error("sqlx error: {0}")]
pub struct SqlError(#[from] sqlx::Error);

impl SqlError {
    pub fn inner(&self) -> &sqlx::Error {
        &self.0
    }
}

impl From<sqlx::migrate::MigrateError> for SqlError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self(error.into())
    }
}

/// A column held bytes which aren't a 16 byte id.
pub(super) fn decode_error(error: uuid::Error) -> SqlError {
    SqlError(sqlx::Error::Decode(Box::new(error)))
}
