//! Dialogue runtime for the shopkeep storefront agent.
//!
//! A turn flows through a small graph: fetch the customer context, ask the
//! reasoner, route each requested action through the guardrails, dispatch
//! read-only actions immediately and suspend on the first mutating one until
//! a human approves or rejects it. Every transition is checkpointed, so a
//! suspended session can be resumed by another process.
//!
//! # Key Types
//!
//! - `AgentRuntime` - graph driver and session entry points (see `runtime`)
//! - `ReasonerAdapter` / `LlmClient` - bounded-retry reasoning over a pluggable model
//! - `GuardrailPolicy` - safe vs. approval-gated routing
//! - `ToolDispatcher` - validated execution against the store collaborators

pub mod approval;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod locks;
pub mod openai;
pub mod runtime;
pub mod tools;

pub use approval::{ApprovalDecision, ApprovalRequest};
pub use conversation::{PendingActionView, SelectionOption, TurnResult, TurnStatus};
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use llm::{
    LlmClient, LlmReply, ReasonerAdapter, ReasonerOutput, ReasonerRequest, ReasonerSettings,
};
pub use openai::OpenAiCompatibleClient;
pub use runtime::{AgentRuntime, RuntimeSettings, TurnRequest};
pub use tools::ToolDispatcher;
