//! Contracts of the commerce collaborators the dialogue runtime calls into.
//!
//! Implementations own stock, carts and orders and are responsible for the
//! atomicity of each operation.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::cart::Cart;
use crate::domain::customer::{CustomerId, CustomerProfile};
use crate::domain::order::{Order, OrderId};
use crate::domain::product::{Product, ProductId, ProductQuery};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Business rule refused the operation.
    #[error("{0}")]
    Rejected(String),
    #[error("insufficient stock for {product}: {available} available, {requested} requested")]
    InsufficientStock { product: String, available: u32, requested: u32 },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    /// The store could not be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }
}

/// Result of `cancel_order`: the cancelled order plus the units put back in stock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelledOrder {
    pub order: Order,
    pub restocked_units: u32,
}

#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn customer_profile(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProfile>, StoreError>;

    async fn order_history(&self, customer_id: &CustomerId) -> Result<Vec<Order>, StoreError>;

    async fn view_cart(&self, customer_id: &CustomerId) -> Result<Cart, StoreError>;

    async fn add_to_cart(
        &self,
        customer_id: &CustomerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, StoreError>;

    /// Sets the quantity of an existing line; zero removes it.
    async fn update_cart_item(
        &self,
        customer_id: &CustomerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, StoreError>;

    /// Returns the number of lines removed.
    async fn clear_cart(&self, customer_id: &CustomerId) -> Result<usize, StoreError>;

    async fn place_order(&self, customer_id: &CustomerId) -> Result<Order, StoreError>;

    async fn cancel_order(
        &self,
        customer_id: &CustomerId,
        order_id: OrderId,
    ) -> Result<CancelledOrder, StoreError>;
}

#[async_trait]
pub trait ProductSearch: Send + Sync {
    async fn search(&self, query: &ProductQuery) -> Result<Vec<Product>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn insufficient_stock_message_names_the_condition() {
        let error = StoreError::InsufficientStock {
            product: "Nón Lá Cổ Điển".to_string(),
            available: 1,
            requested: 3,
        };
        assert!(error.to_string().starts_with("insufficient stock"));
        assert!(!error.is_unavailable());
        assert!(StoreError::Unavailable("pool timed out".to_string()).is_unavailable());
    }
}
