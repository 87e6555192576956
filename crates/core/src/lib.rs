pub mod actions;
pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod errors;
pub mod policies;
pub mod store;

pub use actions::{
    classify, ActionCall, ActionClass, ActionKind, ActionValidationError, UnknownActionError,
};
pub use checkpoint::{CheckpointError, CheckpointStore, SessionSummary};
pub use domain::cart::{Cart, CartLine};
pub use domain::conversation::{
    ActionId, ConversationState, GraphNode, RequestedAction, SessionId, SessionStatus,
    ToolFailure, ToolOutcome, ToolResult, Turn,
};
pub use domain::customer::{CustomerContext, CustomerId, CustomerProfile, LoyaltyTier};
pub use domain::order::{Order, OrderId, OrderLine, OrderStatus};
pub use domain::product::{PriceSort, Product, ProductId, ProductQuery};
pub use errors::{ApplicationError, DialogueError, InterfaceError};
pub use store::{CancelledOrder, CommerceStore, ProductSearch, StoreError};
