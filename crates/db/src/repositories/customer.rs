use chrono::Utc;
use sqlx::Row;

use shopkeep_core::domain::customer::{CustomerId, CustomerProfile, LoyaltyTier};

use super::{timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(
        &self,
        id: &CustomerId,
    ) -> Result<Option<CustomerProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT customer_id, display_name, loyalty_tier FROM customers WHERE customer_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());
        let tier: String = row.try_get("loyalty_tier").map_err(decode)?;

        Ok(Some(CustomerProfile {
            id: CustomerId(row.try_get("customer_id").map_err(decode)?),
            display_name: row.try_get("display_name").map_err(decode)?,
            loyalty_tier: LoyaltyTier::parse(&tier).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown loyalty tier `{tier}`"))
            })?,
        }))
    }

    pub async fn save(&self, profile: &CustomerProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customers (customer_id, display_name, loyalty_tier, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(customer_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 loyalty_tier = excluded.loyalty_tier",
        )
        .bind(&profile.id.0)
        .bind(&profile.display_name)
        .bind(profile.loyalty_tier.as_str())
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
