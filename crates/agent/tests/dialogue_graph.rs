use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shopkeep_agent::{
    AgentRuntime, ApprovalRequest, LlmClient, LlmReply, ReasonerAdapter, ReasonerRequest,
    ReasonerSettings, RuntimeSettings, ToolDispatcher, TurnRequest, TurnStatus,
};
use shopkeep_core::audit::InMemoryAuditSink;
use shopkeep_core::checkpoint::CheckpointStore;
use shopkeep_core::domain::cart::Cart;
use shopkeep_core::domain::conversation::{
    ConversationState, GraphNode, RequestedAction, SessionId, SessionStatus, ToolFailure,
    ToolResult, Turn,
};
use shopkeep_core::domain::customer::{CustomerId, CustomerProfile};
use shopkeep_core::domain::order::{Order, OrderId};
use shopkeep_core::domain::product::{Product, ProductId, ProductQuery};
use shopkeep_core::store::{CancelledOrder, CommerceStore, ProductSearch, StoreError};
use shopkeep_db::{
    connect, migrations, InMemoryCheckpointStore, InMemoryCommerceStore, SqlCheckpointStore,
    StorefrontSeedDataset,
};

struct ScriptedClient {
    replies: Mutex<VecDeque<LlmReply>>,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedClient {
    fn new(replies: Vec<LlmReply>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), seen: Mutex::new(Vec::new()) })
    }

    fn calls(&self) -> usize {
        self.seen.lock().expect("lock").len()
    }

    fn last_history(&self) -> Vec<Turn> {
        self.seen.lock().expect("lock").last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: ReasonerRequest<'_>) -> anyhow::Result<LlmReply> {
        self.seen.lock().expect("lock").push(request.history.to_vec());
        self.replies.lock().expect("lock").pop_front().ok_or_else(|| anyhow!("script exhausted"))
    }
}

/// Asks for the cart on every call.
struct LoopingClient;

#[async_trait]
impl LlmClient for LoopingClient {
    async fn complete(&self, _request: ReasonerRequest<'_>) -> anyhow::Result<LlmReply> {
        Ok(LlmReply::actions(vec![RequestedAction::new("view_cart", Map::new())]))
    }
}

/// Answers after a pause and tracks how many calls overlap.
#[derive(Default)]
struct SlowClient {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for SlowClient {
    async fn complete(&self, _request: ReasonerRequest<'_>) -> anyhow::Result<LlmReply> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LlmReply::text("Dạ, tôi đã nhận được."))
    }
}

/// Holds any turn whose latest message is `held` until the gate opens.
struct GatedClient {
    held: &'static str,
    gate: tokio::sync::Notify,
}

#[async_trait]
impl LlmClient for GatedClient {
    async fn complete(&self, request: ReasonerRequest<'_>) -> anyhow::Result<LlmReply> {
        let latest = request.history.iter().rev().find_map(|turn| match turn {
            Turn::User { text } => Some(text.as_str()),
            _ => None,
        });
        if latest == Some(self.held) {
            self.gate.notified().await;
        }
        Ok(LlmReply::text("Dạ."))
    }
}

/// Seeded in-memory store that records every mutating call it receives.
struct RecordingStore {
    inner: InMemoryCommerceStore,
    mutations: Mutex<Vec<String>>,
}

impl RecordingStore {
    async fn seeded() -> Arc<Self> {
        let inner = InMemoryCommerceStore::new();
        StorefrontSeedDataset::load_in_memory(&inner).await.expect("seed");
        Arc::new(Self { inner, mutations: Mutex::new(Vec::new()) })
    }

    fn record(&self, call: String) {
        self.mutations.lock().expect("lock").push(call);
    }

    fn mutations(&self) -> Vec<String> {
        self.mutations.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CommerceStore for RecordingStore {
    async fn customer_profile(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerProfile>, StoreError> {
        self.inner.customer_profile(customer_id).await
    }

    async fn order_history(&self, customer_id: &CustomerId) -> Result<Vec<Order>, StoreError> {
        self.inner.order_history(customer_id).await
    }

    async fn view_cart(&self, customer_id: &CustomerId) -> Result<Cart, StoreError> {
        self.inner.view_cart(customer_id).await
    }

    async fn add_to_cart(
        &self,
        customer_id: &CustomerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, StoreError> {
        self.record(format!("add_to_cart({customer_id},{product_id},{quantity})"));
        self.inner.add_to_cart(customer_id, product_id, quantity).await
    }

    async fn update_cart_item(
        &self,
        customer_id: &CustomerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart, StoreError> {
        self.record(format!("update_cart_item({customer_id},{product_id},{quantity})"));
        self.inner.update_cart_item(customer_id, product_id, quantity).await
    }

    async fn clear_cart(&self, customer_id: &CustomerId) -> Result<usize, StoreError> {
        self.record(format!("clear_cart({customer_id})"));
        self.inner.clear_cart(customer_id).await
    }

    async fn place_order(&self, customer_id: &CustomerId) -> Result<Order, StoreError> {
        self.record(format!("place_order({customer_id})"));
        self.inner.place_order(customer_id).await
    }

    async fn cancel_order(
        &self,
        customer_id: &CustomerId,
        order_id: OrderId,
    ) -> Result<CancelledOrder, StoreError> {
        self.record(format!("cancel_order({customer_id},{order_id})"));
        self.inner.cancel_order(customer_id, order_id).await
    }
}

#[async_trait]
impl ProductSearch for RecordingStore {
    async fn search(&self, query: &ProductQuery) -> Result<Vec<Product>, StoreError> {
        self.inner.search(query).await
    }
}

fn build_runtime(
    client: Arc<dyn LlmClient>,
    store: Arc<RecordingStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: RuntimeSettings,
) -> AgentRuntime {
    let reasoner = ReasonerAdapter::new(
        client,
        ReasonerSettings { timeout: Duration::from_secs(5), ..ReasonerSettings::default() },
    );
    AgentRuntime::new(reasoner, ToolDispatcher::new(store.clone(), store), checkpoints, settings)
}

struct Harness {
    runtime: AgentRuntime,
    store: Arc<RecordingStore>,
    checkpoints: Arc<InMemoryCheckpointStore>,
    reasoner: Arc<ScriptedClient>,
    audit: InMemoryAuditSink,
}

impl Harness {
    async fn new(script: Vec<LlmReply>) -> Self {
        let store = RecordingStore::seeded().await;
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let reasoner = ScriptedClient::new(script);
        let audit = InMemoryAuditSink::default();
        let runtime = build_runtime(
            reasoner.clone(),
            store.clone(),
            checkpoints.clone(),
            RuntimeSettings::default(),
        )
        .with_audit_sink(Arc::new(audit.clone()));
        Self { runtime, store, checkpoints, reasoner, audit }
    }

    async fn state(&self, session_id: &SessionId) -> ConversationState {
        self.checkpoints.load(session_id).await.expect("load").expect("checkpoint exists")
    }
}

fn call(name: &str, arguments: Value) -> RequestedAction {
    let arguments = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    RequestedAction::new(name, arguments)
}

fn tool_results(state: &ConversationState) -> Vec<ToolResult> {
    state
        .history
        .iter()
        .filter_map(|turn| match turn {
            Turn::Tool(result) => Some(result.clone()),
            _ => None,
        })
        .collect()
}

fn customer() -> CustomerId {
    CustomerId("CUST001".to_string())
}

#[tokio::test]
async fn approved_add_to_cart_is_dispatched_once_with_the_requested_arguments() {
    let harness = Harness::new(vec![
        LlmReply::actions(vec![call("add_to_cart", json!({ "product_id": 5, "quantity": 2 }))]),
        LlmReply::text("Đã thêm 2 Khay Gỗ Truyền Thống vào giỏ hàng của bạn."),
    ])
    .await;

    let waiting = harness
        .runtime
        .handle_turn(TurnRequest::new("thêm 2 sản phẩm số 5 vào giỏ").for_customer(customer()))
        .await;
    assert_eq!(waiting.status, TurnStatus::Waiting);
    assert!(waiting.waiting_for_approval());
    let pending = waiting.pending_action.clone().expect("pending action surfaced");
    assert_eq!(pending.name, "add_to_cart");
    assert_eq!(pending.arguments.get("quantity"), Some(&json!(2)));
    assert!(harness.store.mutations().is_empty(), "nothing runs before approval");

    let state = harness.state(&waiting.session_id).await;
    assert_eq!(state.status, SessionStatus::SuspendedForApproval);

    let done = harness.runtime.resolve(ApprovalRequest::approve(waiting.session_id.clone())).await;
    assert_eq!(done.status, TurnStatus::Completed);
    assert!(!done.waiting_for_approval());
    assert_eq!(done.response, "Đã thêm 2 Khay Gỗ Truyền Thống vào giỏ hàng của bạn.");
    assert_eq!(done.selections[0].text, "Đặt hàng");
    assert_eq!(harness.store.mutations(), vec!["add_to_cart(CUST001,5,2)".to_string()]);

    let cart = harness.store.view_cart(&customer()).await.expect("cart");
    assert_eq!(cart.line(ProductId(5)).map(|line| line.quantity), Some(2));

    assert_eq!(harness.audit.events_of_type("dialogue.approval.suspended").len(), 1);
    assert_eq!(harness.audit.events_of_type("approval.granted").len(), 1);
    assert_eq!(harness.audit.events_of_type("tool.dispatched").len(), 1);
}

#[tokio::test]
async fn rejection_is_fed_back_to_the_reasoner_without_touching_the_store() {
    let harness = Harness::new(vec![
        LlmReply::actions(vec![call("add_to_cart", json!({ "product_id": 5, "quantity": 2 }))]),
        LlmReply::text("Không sao, bạn muốn xem sản phẩm nào khác không?"),
    ])
    .await;

    let waiting = harness.runtime.handle_turn(TurnRequest::new("thêm 2 khay gỗ")).await;
    let done = harness
        .runtime
        .resolve(ApprovalRequest::reject(
            waiting.session_id.clone(),
            Some("changed my mind".to_string()),
        ))
        .await;

    assert_eq!(done.status, TurnStatus::Completed);
    assert_eq!(done.response, "Không sao, bạn muốn xem sản phẩm nào khác không?");
    assert!(harness.store.mutations().is_empty());

    let seen = harness.reasoner.last_history();
    let rejection = seen.iter().rev().find_map(|turn| match turn {
        Turn::Tool(result) => result.error().cloned(),
        _ => None,
    });
    assert_eq!(rejection, Some(ToolFailure::UserRejected("changed my mind".to_string())));
    assert_eq!(harness.audit.events_of_type("approval.rejected").len(), 1);
}

#[tokio::test]
async fn empty_search_never_asks_for_approval() {
    let harness = Harness::new(vec![
        LlmReply::actions(vec![call(
            "search_products",
            json!({ "category": "Nón", "max_price": 1 }),
        )]),
        LlmReply::text("Hiện chưa có nón nào trong tầm giá này."),
    ])
    .await;

    let done = harness.runtime.handle_turn(TurnRequest::new("có nón nào giá 1 đồng không?")).await;

    assert_eq!(done.status, TurnStatus::Completed);
    assert!(done.pending_action.is_none());
    assert!(harness.audit.events_of_type("dialogue.approval.suspended").is_empty());

    let state = harness.state(&done.session_id).await;
    let results = tool_results(&state);
    assert_eq!(results.len(), 1);
    assert!(results[0].ok());
    assert_eq!(harness.reasoner.calls(), 2, "search result looped straight back to the reasoner");
}

#[tokio::test]
async fn blank_reasoner_output_three_times_fails_the_turn_cleanly() {
    let harness = Harness::new(vec![
        LlmReply::text(""),
        LlmReply::text("   "),
        LlmReply::default(),
    ])
    .await;

    let failed = harness.runtime.handle_turn(TurnRequest::new("xin chào")).await;

    assert_eq!(failed.status, TurnStatus::Error);
    assert_eq!(failed.error_code.as_deref(), Some("reasoner_exhausted"));
    assert!(failed.pending_action.is_none());
    assert!(!failed.response.is_empty());

    let state = harness.state(&failed.session_id).await;
    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.pending_action.is_none());
    assert_eq!(harness.audit.events_of_type("dialogue.turn.failed").len(), 1);
}

#[tokio::test]
async fn stock_race_on_place_order_becomes_a_tool_failure_and_session_stays_usable() {
    let harness = Harness::new(vec![
        LlmReply::actions(vec![call("place_order", json!({}))]),
        LlmReply::text("Xin lỗi, sản phẩm vừa hết hàng. Bạn có muốn giảm số lượng không?"),
        LlmReply::text("Vâng, bạn cần gì thêm?"),
    ])
    .await;

    harness.store.inner.add_to_cart(&customer(), ProductId(5), 2).await.expect("cart line");
    let mut product = harness.store.inner.product(ProductId(5)).await.expect("product 5");
    product.stock_quantity = 1;
    harness.store.inner.insert_product(product).await;

    let waiting = harness.runtime.handle_turn(TurnRequest::new("đặt hàng giúp tôi")).await;
    assert_eq!(waiting.status, TurnStatus::Waiting);

    let done = harness.runtime.resolve(ApprovalRequest::approve(waiting.session_id.clone())).await;
    assert_eq!(done.status, TurnStatus::Completed);
    assert_eq!(harness.store.mutations(), vec!["place_order(CUST001)".to_string()]);

    let state = harness.state(&done.session_id).await;
    let failure = tool_results(&state).last().and_then(|result| result.error().cloned());
    assert!(matches!(
        &failure,
        Some(ToolFailure::Collaborator(message)) if message.contains("insufficient stock")
    ));
    assert_eq!(harness.store.inner.product(ProductId(5)).await.map(|p| p.stock_quantity), Some(1));

    let next = harness
        .runtime
        .handle_turn(TurnRequest::new("được rồi").in_session(done.session_id.clone()))
        .await;
    assert_eq!(next.status, TurnStatus::Completed);
    assert_eq!(next.response, "Vâng, bạn cần gì thêm?");
}

#[tokio::test]
async fn batch_runs_safe_actions_and_asks_for_each_sensitive_one_in_order() {
    let harness = Harness::new(vec![
        LlmReply::actions(vec![
            call("view_cart", json!({})),
            call("add_to_cart", json!({ "product_id": 1, "quantity": 1 })),
            call("place_order", json!({})),
        ]),
        LlmReply::text("Đã hủy yêu cầu đặt hàng, giỏ hàng vẫn được giữ."),
    ])
    .await;

    let first = harness.runtime.handle_turn(TurnRequest::new("thêm nón lá rồi đặt hàng")).await;
    assert_eq!(first.pending_action.as_ref().map(|p| p.name.as_str()), Some("add_to_cart"));
    let state = harness.state(&first.session_id).await;
    assert!(tool_results(&state)[0].ok(), "view_cart ran before the suspension");
    assert_eq!(state.queued_actions.len(), 1);

    let second = harness.runtime.resolve(ApprovalRequest::approve(first.session_id.clone())).await;
    assert_eq!(second.status, TurnStatus::Waiting);
    assert_eq!(second.pending_action.as_ref().map(|p| p.name.as_str()), Some("place_order"));
    assert_eq!(harness.reasoner.calls(), 1, "queued action routed without re-asking the reasoner");

    let done = harness
        .runtime
        .resolve(ApprovalRequest::reject(first.session_id.clone(), None))
        .await;
    assert_eq!(done.status, TurnStatus::Completed);
    assert_eq!(harness.store.mutations(), vec!["add_to_cart(CUST001,1,1)".to_string()]);

    let state = harness.state(&first.session_id).await;
    let results = tool_results(&state);
    assert_eq!(results.len(), 3, "every requested action has exactly one result");
    assert!(matches!(results[2].error(), Some(ToolFailure::UserRejected(_))));
}

#[tokio::test]
async fn rejecting_the_first_sensitive_action_skips_the_rest_of_the_batch() {
    let harness = Harness::new(vec![
        LlmReply::actions(vec![
            call("add_to_cart", json!({ "product_id": 5, "quantity": 1 })),
            call("place_order", json!({})),
        ]),
        LlmReply::text("Tôi sẽ không đặt hàng. Bạn muốn làm gì tiếp?"),
    ])
    .await;

    let waiting = harness.runtime.handle_turn(TurnRequest::new("mua 1 khay gỗ")).await;
    let done = harness
        .runtime
        .resolve(ApprovalRequest::reject(waiting.session_id.clone(), Some("thôi".to_string())))
        .await;

    assert_eq!(done.status, TurnStatus::Completed);
    assert!(harness.store.mutations().is_empty());
    let state = harness.state(&done.session_id).await;
    let rejected: Vec<_> = tool_results(&state)
        .into_iter()
        .filter(|result| {
            matches!(result.error(), Some(ToolFailure::UserRejected(reason)) if reason == "thôi")
        })
        .map(|result| result.action_name)
        .collect();
    assert_eq!(rejected, vec!["add_to_cart".to_string(), "place_order".to_string()]);
}

#[tokio::test]
async fn suspended_session_refuses_new_messages_and_keeps_its_state() {
    let harness = Harness::new(vec![LlmReply::actions(vec![call("clear_cart", json!({}))])]).await;

    let waiting = harness.runtime.handle_turn(TurnRequest::new("xóa giỏ hàng")).await;
    let before = harness.state(&waiting.session_id).await;

    let refused = harness
        .runtime
        .handle_turn(TurnRequest::new("khoan đã").in_session(waiting.session_id.clone()))
        .await;
    assert_eq!(refused.status, TurnStatus::Error);
    assert_eq!(refused.error_code.as_deref(), Some("awaiting_approval"));
    assert_eq!(refused.pending_action.map(|p| p.name), Some("clear_cart".to_string()));
    assert_eq!(harness.state(&waiting.session_id).await, before);
}

#[tokio::test]
async fn approving_without_a_pending_action_is_refused() {
    let harness = Harness::new(vec![LlmReply::text("Chào bạn!")]).await;

    let unknown =
        harness.runtime.resolve(ApprovalRequest::approve(SessionId("missing".to_string()))).await;
    assert_eq!(unknown.error_code.as_deref(), Some("no_pending_approval"));

    let done = harness.runtime.handle_turn(TurnRequest::new("xin chào")).await;
    let before = harness.state(&done.session_id).await;
    let misuse = harness.runtime.resolve(ApprovalRequest::approve(done.session_id.clone())).await;
    assert_eq!(misuse.status, TurnStatus::Error);
    assert_eq!(misuse.error_code.as_deref(), Some("no_pending_approval"));
    assert_eq!(harness.state(&done.session_id).await, before);
}

#[tokio::test]
async fn session_of_another_customer_is_not_reachable() {
    let harness = Harness::new(vec![LlmReply::text("Chào bạn!")]).await;
    let done =
        harness.runtime.handle_turn(TurnRequest::new("xin chào").for_customer(customer())).await;

    let other = harness
        .runtime
        .handle_turn(
            TurnRequest::new("cho tôi xem đơn hàng")
                .in_session(done.session_id.clone())
                .for_customer(CustomerId("CUST002".to_string())),
        )
        .await;
    assert_eq!(other.error_code.as_deref(), Some("customer_mismatch"));
}

#[tokio::test]
async fn runaway_graph_stops_at_the_step_limit() {
    let store = RecordingStore::seeded().await;
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let runtime = build_runtime(
        Arc::new(LoopingClient),
        store,
        checkpoints.clone(),
        RuntimeSettings { max_graph_steps: 8, ..RuntimeSettings::default() },
    );

    let failed = runtime.handle_turn(TurnRequest::new("giỏ hàng")).await;
    assert_eq!(failed.error_code.as_deref(), Some("step_limit_exceeded"));

    let state = checkpoints.load(&failed.session_id).await.expect("load").expect("state");
    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.in_flight_action.is_none());
    assert!(state.queued_actions.is_empty());
}

#[tokio::test]
async fn unreachable_store_fails_the_turn_and_answers_the_in_flight_action() {
    let harness = Harness::new(vec![LlmReply::actions(vec![call("view_cart", json!({}))])]).await;
    harness.store.inner.set_unavailable(true);

    let failed = harness.runtime.handle_turn(TurnRequest::new("giỏ hàng của tôi")).await;
    assert_eq!(failed.error_code.as_deref(), Some("collaborator_unavailable"));

    let state = harness.state(&failed.session_id).await;
    assert!(state.context.as_ref().is_some_and(|context| context.degraded));
    let results = tool_results(&state);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].action_name, "view_cart");
    assert!(!results[0].ok());
}

#[tokio::test]
async fn recover_never_repeats_an_interrupted_dispatch() {
    let harness =
        Harness::new(vec![LlmReply::text("Xin lỗi, tôi không chắc sản phẩm đã được thêm.")]).await;
    let session_id = SessionId("crashed".to_string());

    let mut state = ConversationState::new(session_id.clone(), customer());
    state.begin_turn("thêm 2 khay gỗ");
    let action = call("add_to_cart", json!({ "product_id": 5, "quantity": 2 }));
    state.history.push(Turn::Assistant {
        text: String::new(),
        requested_actions: vec![action.clone()],
    });
    state.in_flight_action = Some(action);
    state.next_node = GraphNode::DispatchSensitive;
    state.touch();
    harness.checkpoints.save(&state).await.expect("save");

    let recovered = harness.runtime.recover(&session_id).await.expect("recover");

    assert_eq!(recovered.status, TurnStatus::Completed);
    assert!(harness.store.mutations().is_empty());
    let state = harness.state(&session_id).await;
    let results = tool_results(&state);
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].error().map(ToolFailure::message),
        Some("outcome unknown after interruption")
    );
    assert_eq!(harness.audit.events_of_type("dialogue.session.recovered").len(), 1);

    let missing = harness.runtime.recover(&SessionId("nope".to_string())).await;
    assert_eq!(missing.map(|_| ()).map_err(|error| error.code()), Err("session_not_found"));
}

#[tokio::test]
async fn second_sensitive_request_while_one_is_pending_is_rejected() {
    let harness = Harness::new(Vec::new()).await;
    let session_id = SessionId("corrupt".to_string());

    let mut state = ConversationState::new(session_id.clone(), customer());
    state.begin_turn("đặt hàng");
    state.pending_action = Some(call("add_to_cart", json!({ "product_id": 5, "quantity": 1 })));
    state.queued_actions = vec![call("place_order", json!({}))];
    state.next_node = GraphNode::Route;
    state.touch();
    harness.checkpoints.save(&state).await.expect("save");

    let result = harness.runtime.recover(&session_id).await.expect("recover");
    assert_eq!(result.error_code.as_deref(), Some("concurrent_approval"));

    let state = harness.state(&session_id).await;
    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.pending_action.is_none());
    assert_eq!(tool_results(&state).len(), 2);
    assert!(harness.store.mutations().is_empty());
}

#[tokio::test]
async fn sessions_are_listed_unfinished_first_and_can_be_deleted() {
    let harness = Harness::new(vec![
        LlmReply::text("Chào bạn!"),
        LlmReply::actions(vec![call("clear_cart", json!({}))]),
    ])
    .await;

    let done = harness.runtime.handle_turn(TurnRequest::new("xin chào")).await;
    let waiting = harness.runtime.handle_turn(TurnRequest::new("xóa giỏ hàng")).await;

    let sessions = harness.runtime.list_sessions().await.expect("list");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].session_id, waiting.session_id);
    assert_eq!(sessions[0].pending_action.as_deref(), Some("clear_cart"));

    assert!(harness.runtime.delete_session(&done.session_id).await.expect("delete"));
    assert!(!harness.runtime.delete_session(&done.session_id).await.expect("delete again"));
    assert_eq!(harness.runtime.list_sessions().await.expect("list").len(), 1);
}

#[tokio::test]
async fn suspension_survives_a_restart_and_dispatches_exactly_once() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("sessions.db").display());
    let store = RecordingStore::seeded().await;

    let session_id = {
        let pool = connect(&url).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let runtime = build_runtime(
            ScriptedClient::new(vec![LlmReply::actions(vec![call(
                "add_to_cart",
                json!({ "product_id": 5, "quantity": 2 }),
            )])]),
            store.clone(),
            Arc::new(SqlCheckpointStore::new(pool.clone())),
            RuntimeSettings::default(),
        );
        let waiting = runtime.handle_turn(TurnRequest::new("thêm 2 khay gỗ")).await;
        assert_eq!(waiting.status, TurnStatus::Waiting);
        pool.close().await;
        waiting.session_id
    };

    let pool = connect(&url).await.expect("reconnect");
    let runtime = build_runtime(
        ScriptedClient::new(vec![LlmReply::text("Đã thêm vào giỏ hàng.")]),
        store.clone(),
        Arc::new(SqlCheckpointStore::new(pool.clone())),
        RuntimeSettings::default(),
    );

    let done = runtime.resolve(ApprovalRequest::approve(session_id.clone())).await;
    assert_eq!(done.status, TurnStatus::Completed);
    assert_eq!(done.response, "Đã thêm vào giỏ hàng.");

    let again = runtime.resolve(ApprovalRequest::approve(session_id)).await;
    assert_eq!(again.error_code.as_deref(), Some("no_pending_approval"));
    assert_eq!(store.mutations(), vec!["add_to_cart(CUST001,5,2)".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn turns_for_one_session_never_reason_concurrently() {
    let client = Arc::new(SlowClient::default());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let runtime = build_runtime(
        client.clone(),
        RecordingStore::seeded().await,
        checkpoints.clone(),
        RuntimeSettings::default(),
    );
    let session = SessionId("shared".to_string());

    let (first, second) = tokio::join!(
        runtime.handle_turn(TurnRequest::new("xin chào").in_session(session.clone())),
        runtime.handle_turn(TurnRequest::new("còn nón lá không?").in_session(session.clone())),
    );

    assert_eq!(first.status, TurnStatus::Completed);
    assert_eq!(second.status, TurnStatus::Completed);
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);

    let state = checkpoints.load(&session).await.expect("load").expect("state");
    let user_turns =
        state.history.iter().filter(|turn| matches!(turn, Turn::User { .. })).count();
    assert_eq!(user_turns, 2);
}

#[tokio::test]
async fn a_held_session_does_not_block_other_sessions() {
    let client = Arc::new(GatedClient { held: "chờ chút", gate: tokio::sync::Notify::new() });
    let runtime = build_runtime(
        client.clone(),
        RecordingStore::seeded().await,
        Arc::new(InMemoryCheckpointStore::new()),
        RuntimeSettings::default(),
    );
    let held_done = AtomicBool::new(false);

    let both = async {
        tokio::join!(
            async {
                let result = runtime
                    .handle_turn(TurnRequest::new("chờ chút").in_session(SessionId("a".into())))
                    .await;
                held_done.store(true, Ordering::SeqCst);
                result
            },
            async {
                let result = runtime
                    .handle_turn(TurnRequest::new("xin chào").in_session(SessionId("b".into())))
                    .await;
                assert!(!held_done.load(Ordering::SeqCst), "session a is still held");
                client.gate.notify_one();
                result
            },
        )
    };
    let (held, free) =
        tokio::time::timeout(Duration::from_secs(5), both).await.expect("no cross-session wait");

    assert_eq!(free.status, TurnStatus::Completed);
    assert_eq!(held.status, TurnStatus::Completed);
    assert!(held_done.load(Ordering::SeqCst));
}

#[tokio::test]
async fn assistant_text_sent_with_tool_calls_stays_in_history() {
    let harness = Harness::new(vec![
        LlmReply {
            text: Some("Để tôi kiểm tra giỏ hàng của bạn.".to_string()),
            actions: vec![call("view_cart", json!({}))],
        },
        LlmReply::text("Giỏ hàng của bạn hiện đang trống."),
    ])
    .await;

    let done = harness.runtime.handle_turn(TurnRequest::new("giỏ hàng của tôi")).await;
    assert_eq!(done.status, TurnStatus::Completed);
    assert_eq!(done.response, "Giỏ hàng của bạn hiện đang trống.");

    let preamble = harness.reasoner.last_history().into_iter().find_map(|turn| match turn {
        Turn::Assistant { text, requested_actions } if !requested_actions.is_empty() => Some(text),
        _ => None,
    });
    assert_eq!(preamble.as_deref(), Some("Để tôi kiểm tra giỏ hàng của bạn."));
}
