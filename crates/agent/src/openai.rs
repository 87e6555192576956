//! Client for the `/v1/chat/completions` protocol spoken by OpenAI and Ollama.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Local;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use shopkeep_core::actions::ActionKind;
use shopkeep_core::config::AppConfig;
use shopkeep_core::domain::conversation::{ActionId, RequestedAction, ToolOutcome, ToolResult, Turn};
use shopkeep_core::domain::customer::CustomerContext;
use shopkeep_core::domain::product::{CATEGORIES, MATERIALS};

use crate::llm::{LlmClient, LlmReply, ReasonerRequest};

const SYSTEM_PROMPT: &str = "You are a friendly customer support assistant \
for a Vietnamese handicraft store. \
Respond in Vietnamese if the user speaks Vietnamese, otherwise use English. \
Use tools to search products, check orders, manage the cart, or answer policy questions. \
For vague requests, clarify by asking about category, material, price range or quantity. \
For 'đắt nhất' or 'most expensive' use search_products with sort_by_price='desc'; \
for 'rẻ nhất' or 'cheapest' use sort_by_price='asc'. \
Always check stock_quantity with search_products before calling add_to_cart or place_order. \
If stock is insufficient, suggest alternatives. \
If no products match, say so and propose another category. \
If a tool fails or the customer rejects an action, apologize briefly and ask how to continue. \
Cart changes and orders are confirmed by the customer before they run. \
Keep responses concise, warm, and helpful.";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    tools: Vec<Value>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    id: Option<String>,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for the language model")?;

        Ok(Self {
            http,
            endpoint: completions_endpoint(base_url),
            api_key,
            model: model.into(),
            temperature,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.llm_base_url(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.temperature,
            Duration::from_secs(config.llm.timeout_secs.max(1)),
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: ReasonerRequest<'_>) -> Result<LlmReply> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: build_messages(request),
            tools: tool_definitions(),
            temperature: self.temperature,
        };

        let mut http_request = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key.expose_secret());
        }

        let response = http_request.send().await.context("language model request failed")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("language model returned {status}: {}", truncate(&text, 400));
        }

        let completion: ChatCompletionResponse =
            response.json().await.context("language model returned malformed JSON")?;
        let reply = parse_completion(completion)?;
        debug!(
            event_name = "reasoner.completion.received",
            actions = reply.actions.len(),
            has_text = reply.text.is_some(),
            "language model replied"
        );
        Ok(reply)
    }
}

fn completions_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Function-tool declarations for the whole action catalog.
pub fn tool_definitions() -> Vec<Value> {
    ActionKind::ALL
        .iter()
        .map(|kind| {
            json!({
                "type": "function",
                "function": {
                    "name": kind.name(),
                    "description": kind.description(),
                    "parameters": kind.parameters_schema(),
                }
            })
        })
        .collect()
}

fn system_prompt(context: Option<&CustomerContext>) -> String {
    let customer = match context {
        Some(context) if !context.degraded => serde_json::to_string(&json!({
            "customer_id": context.customer_id,
            "display_name": context.display_name,
            "loyalty_tier": context.loyalty_tier,
            "orders": context.orders.iter().map(|order| json!({
                "order_id": order.id,
                "status": order.status.label(),
                "placed_at": order.placed_at.to_rfc3339(),
                "total_amount": order.total_amount,
                "items": order.lines.iter().map(|line| json!({
                    "product_id": line.product_id,
                    "name": line.product_name,
                    "quantity": line.quantity,
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        }))
        .unwrap_or_default(),
        _ => "unavailable".to_string(),
    };

    format!(
        "{SYSTEM_PROMPT}\nProduct categories: {}.\nMaterials: {}.\n\n\
         Current customer:\n<Customer>\n{customer}\n</Customer>\nCurrent time: {}.",
        CATEGORIES.join(", "),
        MATERIALS.join(", "),
        Local::now().format("%Y-%m-%d %H:%M"),
    )
}

/// Converts the dialogue history into chat messages.
pub fn build_messages(request: ReasonerRequest<'_>) -> Vec<Value> {
    let mut messages = vec![json!({ "role": "system", "content": system_prompt(request.context) })];

    for turn in request.history {
        match turn {
            Turn::User { text } => messages.push(json!({ "role": "user", "content": text })),
            Turn::Assistant { text, requested_actions } if requested_actions.is_empty() => {
                messages.push(json!({ "role": "assistant", "content": text }));
            }
            Turn::Assistant { text, requested_actions } => {
                let tool_calls: Vec<Value> = requested_actions
                    .iter()
                    .map(|action| {
                        json!({
                            "id": action.id,
                            "type": "function",
                            "function": {
                                "name": action.name,
                                "arguments": Value::Object(action.arguments.clone()).to_string(),
                            }
                        })
                    })
                    .collect();
                let content = if text.trim().is_empty() { Value::Null } else { json!(text) };
                messages.push(json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": tool_calls,
                }));
            }
            Turn::Tool(result) => messages.push(json!({
                "role": "tool",
                "tool_call_id": result.action_id,
                "content": tool_message_content(result),
            })),
        }
    }

    if let Some(corrective_prompt) = request.corrective_prompt {
        messages.push(json!({ "role": "user", "content": corrective_prompt }));
    }
    messages
}

fn tool_message_content(result: &ToolResult) -> String {
    let body = match &result.outcome {
        ToolOutcome::Success { payload } => json!({ "ok": true, "payload": payload }),
        ToolOutcome::Failure { error } => json!({
            "ok": false,
            "error": { "code": error.code(), "message": error.message() },
        }),
    };
    body.to_string()
}

fn parse_completion(completion: ChatCompletionResponse) -> Result<LlmReply> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("language model returned no choices"))?;

    let actions = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| {
            let arguments = parse_arguments(call.function.arguments)
                .with_context(|| format!("malformed arguments for `{}`", call.function.name))?;
            Ok(RequestedAction {
                id: call
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .map(ActionId)
                    .unwrap_or_else(ActionId::generate),
                name: call.function.name,
                arguments,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let text = choice.message.content.map(|content| strip_reasoning_artifacts(&content));
    Ok(LlmReply { text, actions })
}

/// Reasoning blocks a model may leak into `content`; the inner text is dropped.
const REASONING_BLOCKS: &[(&str, &str)] =
    &[("<｜thinking｜>", "<｜/thinking｜>"), ("<think>", "</think>")];

/// Tool-output framing tokens some Ollama models echo back verbatim.
const STRAY_MARKERS: &[&str] = &[
    "<｜tool▁outputs▁begin｜>",
    "<｜tool▁output▁begin｜>",
    "<｜tool▁output▁end｜>",
    "<｜tool▁outputs▁end｜>",
    "<｜tool ▁outputs ▁begin｜>",
    "<｜tool ▁output ▁begin｜>",
    "<｜tool ▁output ▁end｜>",
    "<｜tool ▁outputs ▁end｜>",
];

/// Removes reasoning blocks and framing tokens, then collapses runs of blank
/// lines. A reply made only of artifacts comes back empty.
fn strip_reasoning_artifacts(content: &str) -> String {
    let mut cleaned = content.to_string();
    for (open, close) in REASONING_BLOCKS {
        while let Some(start) = cleaned.find(open) {
            let end = cleaned[start..]
                .find(close)
                .map(|offset| start + offset + close.len())
                .unwrap_or(cleaned.len());
            cleaned.replace_range(start..end, "");
        }
        cleaned = cleaned.replace(close, "");
    }
    for marker in STRAY_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }

    let mut lines = Vec::new();
    let mut previous_blank = false;
    for line in cleaned.lines() {
        let blank = line.trim().is_empty();
        if !(blank && previous_blank) {
            lines.push(if blank { "" } else { line });
        }
        previous_blank = blank;
    }
    lines.join("\n").trim().to_string()
}

/// Providers send arguments either as a JSON-encoded string or as an object.
fn parse_arguments(arguments: Value) -> Result<Map<String, Value>> {
    match arguments {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => bail!("expected a JSON object, got {other}"),
        },
        other => bail!("expected a JSON object, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};
    use shopkeep_core::domain::conversation::{RequestedAction, ToolFailure, ToolResult, Turn};

    use super::{
        build_messages, completions_endpoint, parse_completion, strip_reasoning_artifacts,
        tool_definitions, ChatCompletionResponse,
    };
    use crate::llm::ReasonerRequest;

    #[test]
    fn endpoint_accepts_base_urls_with_or_without_version() {
        assert_eq!(
            completions_endpoint("https://api.openai.com"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("http://localhost:11434/v1/"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn every_catalog_action_is_declared_as_a_tool() {
        let tools = tool_definitions();
        assert_eq!(tools.len(), 9);
        assert!(tools.iter().any(|tool| tool["function"]["name"] == "place_order"));
    }

    #[test]
    fn history_maps_to_chat_messages_with_tool_call_ids() {
        let mut arguments = Map::new();
        arguments.insert("product_id".to_string(), json!(5));
        arguments.insert("quantity".to_string(), json!(2));
        let action = RequestedAction::new("add_to_cart", arguments);
        let history = vec![
            Turn::User { text: "thêm 2 khay gỗ".to_string() },
            Turn::Assistant { text: String::new(), requested_actions: vec![action.clone()] },
            Turn::Tool(ToolResult::failure(
                &action,
                ToolFailure::UserRejected("changed my mind".to_string()),
            )),
        ];

        let messages = build_messages(ReasonerRequest {
            history: &history,
            context: None,
            corrective_prompt: Some("Respond with a real output."),
        });

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["tool_calls"][0]["id"], json!(action.id));
        assert!(messages[2]["content"].is_null());
        assert_eq!(messages[3]["tool_call_id"], json!(action.id));
        assert!(messages[3]["content"].as_str().unwrap_or_default().contains("user_rejected"));
        assert_eq!(messages[4]["content"], "Respond with a real output.");
    }

    #[test]
    fn completion_with_string_arguments_becomes_requested_actions() {
        let completion: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "search_products",
                            "arguments": "{\"category\":\"Nón\"}"
                        }
                    }]
                }
            }]
        }))
        .expect("decode completion");

        let reply = parse_completion(completion).expect("parse");
        assert_eq!(reply.actions.len(), 1);
        assert_eq!(reply.actions[0].id.0, "call_abc");
        assert_eq!(reply.actions[0].arguments["category"], "Nón");
    }

    #[test]
    fn malformed_arguments_are_an_error() {
        let completion: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "tool_calls": [{
                "function": { "name": "view_cart", "arguments": "{not json" }
            }] } }]
        }))
        .expect("decode completion");
        assert!(parse_completion(completion).is_err());
    }

    #[test]
    fn reasoning_blocks_do_not_reach_the_customer() {
        let completion: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{ "message": {
                "content": "<｜thinking｜>khách muốn nón<｜/thinking｜>\n\nChào bạn!"
            } }]
        }))
        .expect("decode completion");

        let reply = parse_completion(completion).expect("parse");
        assert_eq!(reply.text.as_deref(), Some("Chào bạn!"));
    }

    #[test]
    fn framing_tokens_and_blank_runs_are_collapsed() {
        let raw = concat!(
            "<think>cần tra cứu</think>Nón lá giá 120.000đ.<｜tool▁outputs▁end｜>",
            "\n\n\n  \nBạn cần thêm gì?"
        );
        assert_eq!(strip_reasoning_artifacts(raw), "Nón lá giá 120.000đ.\n\nBạn cần thêm gì?");
        assert_eq!(strip_reasoning_artifacts("<｜thinking｜>chỉ suy nghĩ"), "");
    }
}
