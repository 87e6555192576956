use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use shopkeep_core::checkpoint::{CheckpointError, CheckpointStore, SessionSummary};
use shopkeep_core::domain::cart::{Cart, CartLine};
use shopkeep_core::domain::conversation::{ConversationState, SessionId};
use shopkeep_core::domain::customer::{CustomerId, CustomerProfile};
use shopkeep_core::domain::order::{Order, OrderId, OrderLine, OrderStatus};
use shopkeep_core::domain::product::{PriceSort, Product, ProductId, ProductQuery};
use shopkeep_core::store::{CancelledOrder, CommerceStore, ProductSearch, StoreError};

#[derive(Default)]
struct StoreState {
    products: BTreeMap<i64, Product>,
    customers: HashMap<String, CustomerProfile>,
    carts: HashMap<String, Vec<CartLine>>,
    orders: BTreeMap<i64, Order>,
}

/// Commerce store held in process memory. One lock guards all tables, so each
/// operation is atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryCommerceStore {
    state: RwLock<StoreState>,
    unavailable: AtomicBool,
}

impl InMemoryCommerceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_product(&self, product: Product) {
        self.state.write().await.products.insert(product.id.0, product);
    }

    pub async fn insert_customer(&self, profile: CustomerProfile) {
        self.state.write().await.customers.insert(profile.id.0.clone(), profile);
    }

    pub async fn insert_order(&self, order: Order) {
        self.state.write().await.orders.insert(order.id.0, order);
    }

    pub async fn product(&self, id: ProductId) -> Option<Product> {
        self.state.read().await.products.get(&id.0).cloned()
    }

    /// While set, every call fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

fn cart_of(state: &StoreState, customer_id: &CustomerId) -> Cart {
    Cart::new(customer_id.clone(), state.carts.get(&customer_id.0).cloned().unwrap_or_default())
}

fn product_in<'a>(state: &'a StoreState, product_id: ProductId) -> Result<&'a Product, StoreError> {
    state.products.get(&product_id.0).ok_or_else(|| StoreError::not_found("product", product_id))
}

#[async_trait]
impl CommerceStore for InMemoryCommerceStore {
    async fn customer_profile(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProfile>, StoreError> {
        self.check_available()?;
        Ok(self.state.read().await.customers.get(&customer_id.0).cloned())
    }

    async fn order_history(&self, customer_id: &CustomerId) -> Result<Vec<Order>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| order.customer_id == *customer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.placed_at.cmp(&a.placed_at).then(b.id.0.cmp(&a.id.0)));
        Ok(orders)
    }

    async fn view_cart(&self, customer_id: &CustomerId) -> Result<Cart, StoreError> {
        self.check_available()?;
        Ok(cart_of(&*self.state.read().await, customer_id))
    }

    async fn add_to_cart(
        &self,
        customer_id: &CustomerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, StoreError> {
        self.check_available()?;
        if quantity == 0 {
            return Err(StoreError::Rejected("quantity must be greater than zero".to_string()));
        }

        let mut state = self.state.write().await;
        let product = product_in(&state, product_id)?.clone();
        let existing = state
            .carts
            .get(&customer_id.0)
            .and_then(|lines| lines.iter().find(|line| line.product_id == product_id))
            .map_or(0, |line| line.quantity);
        let requested = existing.saturating_add(quantity);
        if requested > product.stock_quantity {
            return Err(StoreError::InsufficientStock {
                product: product.name,
                available: product.stock_quantity,
                requested,
            });
        }

        let lines = state.carts.entry(customer_id.0.clone()).or_default();
        match lines.iter_mut().find(|line| line.product_id == product_id) {
            Some(line) => line.quantity = requested,
            None => lines.push(CartLine {
                product_id,
                name: product.name,
                quantity: requested,
                unit_price: product.price,
            }),
        }
        Ok(cart_of(&state, customer_id))
    }

    async fn update_cart_item(
        &self,
        customer_id: &CustomerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let in_cart = state
            .carts
            .get(&customer_id.0)
            .is_some_and(|lines| lines.iter().any(|line| line.product_id == product_id));
        if !in_cart {
            return Err(StoreError::Rejected(format!("product {product_id} is not in the cart")));
        }

        if quantity > 0 {
            let product = product_in(&state, product_id)?;
            if quantity > product.stock_quantity {
                return Err(StoreError::InsufficientStock {
                    product: product.name.clone(),
                    available: product.stock_quantity,
                    requested: quantity,
                });
            }
        }

        if let Some(lines) = state.carts.get_mut(&customer_id.0) {
            if quantity == 0 {
                lines.retain(|line| line.product_id != product_id);
            } else if let Some(line) = lines.iter_mut().find(|line| line.product_id == product_id) {
                line.quantity = quantity;
            }
            if lines.is_empty() {
                state.carts.remove(&customer_id.0);
            }
        }
        Ok(cart_of(&state, customer_id))
    }

    async fn clear_cart(&self, customer_id: &CustomerId) -> Result<usize, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        Ok(state.carts.remove(&customer_id.0).map_or(0, |lines| lines.len()))
    }

    async fn place_order(&self, customer_id: &CustomerId) -> Result<Order, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let cart = cart_of(&state, customer_id);
        if cart.is_empty() {
            return Err(StoreError::Rejected(
                "the cart is empty; add products before placing an order".to_string(),
            ));
        }

        // Check every line before touching stock so a refusal changes nothing.
        for line in &cart.lines {
            let product = product_in(&state, line.product_id)?;
            if product.stock_quantity < line.quantity {
                return Err(StoreError::InsufficientStock {
                    product: product.name.clone(),
                    available: product.stock_quantity,
                    requested: line.quantity,
                });
            }
        }
        for line in &cart.lines {
            if let Some(product) = state.products.get_mut(&line.product_id.0) {
                product.stock_quantity -= line.quantity;
            }
        }

        let order_id = state.orders.keys().next_back().map_or(1, |last| last + 1);
        let order = Order {
            id: OrderId(order_id),
            customer_id: customer_id.clone(),
            status: OrderStatus::Processing,
            placed_at: Utc::now(),
            total_amount: cart.total,
            lines: cart
                .lines
                .into_iter()
                .map(|line| OrderLine {
                    product_id: line.product_id,
                    product_name: line.name,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
        };
        state.orders.insert(order_id, order.clone());
        state.carts.remove(&customer_id.0);
        Ok(order)
    }

    async fn cancel_order(
        &self,
        customer_id: &CustomerId,
        order_id: OrderId,
    ) -> Result<CancelledOrder, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get(&order_id.0)
            .filter(|order| order.customer_id == *customer_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", order_id))?;

        match order.status {
            OrderStatus::Delivered => {
                return Err(StoreError::Rejected(format!(
                    "order {order_id} has already been delivered and cannot be cancelled; \
                     use the returns policy instead"
                )))
            }
            OrderStatus::Cancelled => {
                return Err(StoreError::Rejected(format!("order {order_id} is already cancelled")))
            }
            OrderStatus::Processing | OrderStatus::Confirmed | OrderStatus::Shipping => {}
        }

        let mut restocked_units = 0u32;
        for line in &order.lines {
            if let Some(product) = state.products.get_mut(&line.product_id.0) {
                product.stock_quantity = product.stock_quantity.saturating_add(line.quantity);
            }
            restocked_units = restocked_units.saturating_add(line.quantity);
        }

        let mut order = order;
        order.status = OrderStatus::Cancelled;
        state.orders.insert(order_id.0, order.clone());
        Ok(CancelledOrder { order, restocked_units })
    }
}

#[async_trait]
impl ProductSearch for InMemoryCommerceStore {
    async fn search(&self, query: &ProductQuery) -> Result<Vec<Product>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut products: Vec<Product> =
            state.products.values().filter(|product| query.matches(product)).cloned().collect();
        match query.sort_by_price {
            Some(PriceSort::Asc) => products.sort_by(|a, b| a.price.cmp(&b.price)),
            Some(PriceSort::Desc) => products.sort_by(|a, b| b.price.cmp(&a.price)),
            None => {}
        }
        products.truncate(query.limit as usize);
        Ok(products)
    }
}

/// Checkpoints held in process memory, with the same version rule as the SQL store.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, state: &ConversationState) -> Result<(), CheckpointError> {
        let mut states = self.states.write().await;
        if let Some(stored) = states.get(&state.session_id.0) {
            if stored.version >= state.version {
                return Err(CheckpointError::StaleWrite {
                    session_id: state.session_id.0.clone(),
                    version: state.version,
                });
            }
        }
        states.insert(state.session_id.0.clone(), state.clone());
        Ok(())
    }

    async fn load(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ConversationState>, CheckpointError> {
        Ok(self.states.read().await.get(&session_id.0).cloned())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, CheckpointError> {
        Ok(self.states.write().await.remove(&session_id.0).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        let states = self.states.read().await;
        let mut summaries: Vec<SessionSummary> =
            states.values().map(SessionSummary::from).collect();
        summaries.sort_by(|a, b| {
            b.updated_at.cmp(&a.updated_at).then_with(|| a.session_id.0.cmp(&b.session_id.0))
        });
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use shopkeep_core::checkpoint::{CheckpointError, CheckpointStore};
    use shopkeep_core::domain::conversation::{ConversationState, SessionId};
    use shopkeep_core::domain::customer::CustomerId;
    use shopkeep_core::domain::product::{Product, ProductId, ProductQuery};
    use shopkeep_core::store::{CommerceStore, ProductSearch, StoreError};

    use super::{InMemoryCheckpointStore, InMemoryCommerceStore};

    fn product(id: i64, price: i64, stock: u32) -> Product {
        Product {
            id: ProductId(id),
            name: format!("Sản phẩm {id}"),
            category: "Nón".to_string(),
            material: "Lá cọ".to_string(),
            price: Decimal::from(price),
            stock_quantity: stock,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn refused_order_leaves_stock_untouched() {
        let store = InMemoryCommerceStore::new();
        store.insert_product(product(1, 100_000, 5)).await;
        store.insert_product(product(2, 50_000, 1)).await;
        let customer = CustomerId("CUST001".to_string());

        store.add_to_cart(&customer, ProductId(1), 2).await.expect("add");
        store.add_to_cart(&customer, ProductId(2), 1).await.expect("add");
        store.insert_product(product(2, 50_000, 0)).await;

        let error = store.place_order(&customer).await.expect_err("out of stock");
        assert!(matches!(error, StoreError::InsufficientStock { .. }));
        assert_eq!(store.product(ProductId(1)).await.map(|p| p.stock_quantity), Some(5));
    }

    #[tokio::test]
    async fn switched_off_store_reports_unavailable() {
        let store = InMemoryCommerceStore::new();
        store.set_unavailable(true);
        let error = store.search(&ProductQuery::default()).await.expect_err("unavailable");
        assert!(error.is_unavailable());
    }

    #[tokio::test]
    async fn checkpoint_versions_must_increase() {
        let store = InMemoryCheckpointStore::new();
        let mut state =
            ConversationState::new(SessionId("s-1".to_string()), CustomerId("CUST001".to_string()));
        state.touch();
        store.save(&state).await.expect("save");
        assert!(matches!(store.save(&state).await, Err(CheckpointError::StaleWrite { .. })));
        state.touch();
        store.save(&state).await.expect("newer version");
        assert_eq!(store.list().await.expect("list").len(), 1);
    }
}
