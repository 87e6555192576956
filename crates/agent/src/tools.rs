use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use shopkeep_core::actions::{ActionCall, ActionKind, UnknownActionError};
use shopkeep_core::domain::cart::Cart;
use shopkeep_core::domain::conversation::{RequestedAction, ToolFailure, ToolResult};
use shopkeep_core::domain::customer::CustomerId;
use shopkeep_core::domain::order::Order;
use shopkeep_core::errors::DialogueError;
use shopkeep_core::policies;
use shopkeep_core::store::{CommerceStore, ProductSearch, StoreError};

/// Executes validated actions against the store and search collaborators.
///
/// Validation failures and store rejections come back as failed tool results
/// for the reasoner to read. Only an unknown action name or an unreachable
/// collaborator is returned as an error, which fails the turn.
#[derive(Clone)]
pub struct ToolDispatcher {
    store: Arc<dyn CommerceStore>,
    search: Arc<dyn ProductSearch>,
}

impl ToolDispatcher {
    pub fn new(store: Arc<dyn CommerceStore>, search: Arc<dyn ProductSearch>) -> Self {
        Self { store, search }
    }

    pub fn store(&self) -> &Arc<dyn CommerceStore> {
        &self.store
    }

    pub async fn dispatch(
        &self,
        action: &RequestedAction,
        customer_id: &CustomerId,
    ) -> Result<ToolResult, DialogueError> {
        let kind = ActionKind::parse(&action.name)
            .ok_or_else(|| UnknownActionError { name: action.name.clone() })?;

        let call = match kind.validate(&action.arguments) {
            Ok(call) => call,
            Err(error) => {
                warn!(
                    event_name = "tool.dispatch.invalid_arguments",
                    action = %kind,
                    action_id = %action.id,
                    error = %error,
                    "action arguments rejected before dispatch"
                );
                return Ok(ToolResult::failure(action, ToolFailure::Validation(error.to_string())));
            }
        };

        match self.execute(call, customer_id).await {
            Ok(payload) => {
                info!(
                    event_name = "tool.dispatch.succeeded",
                    action = %kind,
                    action_id = %action.id,
                    customer_id = %customer_id,
                    "action dispatched"
                );
                Ok(ToolResult::success(action, payload))
            }
            Err(error) if error.is_unavailable() => {
                warn!(
                    event_name = "tool.dispatch.unavailable",
                    action = %kind,
                    action_id = %action.id,
                    error = %error,
                    "collaborator unreachable"
                );
                Err(DialogueError::CollaboratorUnavailable(error.to_string()))
            }
            Err(error) => {
                info!(
                    event_name = "tool.dispatch.failed",
                    action = %kind,
                    action_id = %action.id,
                    error = %error,
                    "collaborator refused the action"
                );
                Ok(ToolResult::failure(action, ToolFailure::Collaborator(error.to_string())))
            }
        }
    }

    async fn execute(
        &self,
        call: ActionCall,
        customer_id: &CustomerId,
    ) -> Result<Value, StoreError> {
        match call {
            ActionCall::SearchProducts(query) => {
                let products = self.search.search(&query).await?;
                Ok(json!({ "count": products.len(), "products": products }))
            }
            ActionCall::FetchUserOrderInformation => {
                let orders = self.store.order_history(customer_id).await?;
                Ok(json!({
                    "customer_id": customer_id,
                    "orders": orders.iter().map(order_payload).collect::<Vec<_>>(),
                }))
            }
            ActionCall::LookupStorePolicy { query } => {
                let answer = policies::lookup(&query);
                Ok(json!({
                    "topic": answer.topic.map(|topic| topic.as_str()),
                    "policy": answer.text,
                }))
            }
            ActionCall::ViewCart => {
                let cart = self.store.view_cart(customer_id).await?;
                Ok(cart_payload(&cart, None))
            }
            ActionCall::AddToCart { product_id, quantity } => {
                let cart = self.store.add_to_cart(customer_id, product_id, quantity).await?;
                let message = format!("Đã thêm {quantity} sản phẩm #{product_id} vào giỏ hàng.");
                Ok(cart_payload(&cart, Some(message)))
            }
            ActionCall::UpdateCartItem { product_id, quantity } => {
                let cart = self.store.update_cart_item(customer_id, product_id, quantity).await?;
                let message = if quantity == 0 {
                    format!("Đã xóa sản phẩm #{product_id} khỏi giỏ hàng.")
                } else {
                    format!("Đã cập nhật số lượng sản phẩm #{product_id} thành {quantity}.")
                };
                Ok(cart_payload(&cart, Some(message)))
            }
            ActionCall::ClearCart => {
                let removed = self.store.clear_cart(customer_id).await?;
                let message =
                    if removed == 0 { "Giỏ hàng đã trống." } else { "Đã xóa toàn bộ giỏ hàng." };
                Ok(json!({ "removed_lines": removed, "message": message }))
            }
            ActionCall::PlaceOrder => {
                let order = self.store.place_order(customer_id).await?;
                let mut payload = order_payload(&order);
                payload["message"] = json!(format!("Đơn hàng #{} đã được tạo.", order.id));
                Ok(payload)
            }
            ActionCall::CancelOrder { order_id } => {
                let cancelled = self.store.cancel_order(customer_id, order_id).await?;
                let mut payload = order_payload(&cancelled.order);
                payload["restocked_units"] = json!(cancelled.restocked_units);
                payload["message"] = json!(format!("Đơn hàng #{order_id} đã được hủy."));
                Ok(payload)
            }
        }
    }
}

fn cart_payload(cart: &Cart, message: Option<String>) -> Value {
    let mut payload = json!({
        "items": cart.lines.iter().map(|line| json!({
            "product_id": line.product_id,
            "name": line.name,
            "quantity": line.quantity,
            "unit_price": line.unit_price,
            "line_total": line.line_total(),
        })).collect::<Vec<_>>(),
        "total": cart.total,
    });
    if cart.is_empty() {
        payload["message"] = json!("Giỏ hàng trống.");
    }
    if let Some(message) = message {
        payload["message"] = json!(message);
    }
    payload
}

fn order_payload(order: &Order) -> Value {
    json!({
        "order_id": order.id,
        "status": order.status.as_str(),
        "status_label": order.status.label(),
        "placed_at": order.placed_at.to_rfc3339(),
        "total_amount": order.total_amount,
        "items": order.lines.iter().map(|line| json!({
            "product_id": line.product_id,
            "name": line.product_name,
            "quantity": line.quantity,
            "unit_price": line.unit_price,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use serde_json::{json, Map, Value};
    use shopkeep_core::domain::conversation::{
        RequestedAction, ToolFailure, ToolOutcome, ToolResult,
    };
    use shopkeep_core::domain::customer::CustomerId;
    use shopkeep_core::domain::product::{Product, ProductId};
    use shopkeep_core::errors::DialogueError;
    use shopkeep_core::store::CommerceStore;
    use shopkeep_db::InMemoryCommerceStore;

    use super::ToolDispatcher;

    async fn dispatcher() -> (ToolDispatcher, Arc<InMemoryCommerceStore>) {
        let store = Arc::new(InMemoryCommerceStore::new());
        store
            .insert_product(Product {
                id: ProductId(5),
                name: "Khay Gỗ Truyền Thống".to_string(),
                category: "Đồ Gia Dụng".to_string(),
                material: "Gỗ".to_string(),
                price: Decimal::from(200_000),
                stock_quantity: 3,
                description: String::new(),
            })
            .await;
        (ToolDispatcher::new(store.clone(), store.clone()), store)
    }

    fn action(name: &str, arguments: Value) -> RequestedAction {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        RequestedAction::new(name, arguments)
    }

    fn customer() -> CustomerId {
        CustomerId("CUST001".to_string())
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_store() {
        let (dispatcher, store) = dispatcher().await;
        let zero = action("add_to_cart", json!({ "product_id": 5, "quantity": 0 }));
        let result = dispatcher.dispatch(&zero, &customer()).await.expect("dispatch");

        assert!(matches!(result.error(), Some(ToolFailure::Validation(_))));
        assert_eq!(store.product(ProductId(5)).await.map(|p| p.stock_quantity), Some(3));
        assert!(store.view_cart(&customer()).await.expect("cart").is_empty());
    }

    #[tokio::test]
    async fn store_rejection_becomes_a_collaborator_failure() {
        let (dispatcher, _) = dispatcher().await;
        let four = action("add_to_cart", json!({ "product_id": 5, "quantity": 4 }));
        let result = dispatcher.dispatch(&four, &customer()).await.expect("dispatch");

        let failure = result.error().expect("failure");
        assert_eq!(failure.code(), "collaborator_error");
        assert!(failure.message().contains("insufficient stock"));
    }

    #[tokio::test]
    async fn unreachable_store_fails_the_turn() {
        let (dispatcher, store) = dispatcher().await;
        store.set_unavailable(true);
        let error = dispatcher
            .dispatch(&action("view_cart", json!({})), &customer())
            .await
            .expect_err("unavailable");
        assert_eq!(error.code(), "collaborator_unavailable");
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let (dispatcher, _) = dispatcher().await;
        let error = dispatcher
            .dispatch(&action("drop_tables", json!({})), &customer())
            .await
            .expect_err("unknown");
        assert!(matches!(error, DialogueError::UnknownAction(_)));
    }

    #[tokio::test]
    async fn empty_search_is_a_successful_result() {
        let (dispatcher, _) = dispatcher().await;
        let result = dispatcher
            .dispatch(&action("search_products", json!({ "category": "Nón" })), &customer())
            .await
            .expect("dispatch");
        assert!(result.ok());
        assert_eq!(result_payload(&result)["count"], 0);
    }

    #[tokio::test]
    async fn policy_lookup_always_succeeds() {
        let (dispatcher, _) = dispatcher().await;
        let result = dispatcher
            .dispatch(&action("lookup_store_policy", json!({ "query": "đổi trả??" })), &customer())
            .await
            .expect("dispatch");
        assert!(result.ok());
    }

    fn result_payload(result: &ToolResult) -> Value {
        match &result.outcome {
            ToolOutcome::Success { payload } => payload.clone(),
            ToolOutcome::Failure { .. } => Value::Null,
        }
    }
}
