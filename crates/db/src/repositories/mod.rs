use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use shopkeep_core::checkpoint::CheckpointError;
use shopkeep_core::store::StoreError;

pub mod checkpoint;
pub mod commerce;
pub mod customer;
pub mod memory;
pub mod product;

pub use checkpoint::SqlCheckpointStore;
pub use commerce::SqlCommerceStore;
pub use customer::SqlCustomerRepository;
pub use memory::{InMemoryCheckpointStore, InMemoryCommerceStore};
pub use product::SqlProductRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    /// Connection-level failures, as opposed to query or data problems.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        if value.is_unavailable() {
            Self::Unavailable(value.to_string())
        } else {
            Self::Backend(value.to_string())
        }
    }
}

impl From<RepositoryError> for CheckpointError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Decode(message) => Self::Encoding(message),
            RepositoryError::Database(error) => Self::Backend(error.to_string()),
        }
    }
}

pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid {column} `{value}`: {error}")))
}

/// Prices are stored as whole dong.
pub(crate) fn price_to_db(value: Decimal) -> Result<i64, RepositoryError> {
    value
        .round()
        .to_i64()
        .ok_or_else(|| RepositoryError::Decode(format!("price {value} does not fit in INTEGER")))
}

pub(crate) fn price_from_db(value: i64) -> Decimal {
    Decimal::from(value)
}

pub(crate) fn quantity_from_db(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("invalid {column} `{value}`")))
}
