use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use shopkeep_core::config::{AgentConfig, LlmConfig, DEFAULT_CORRECTIVE_PROMPT};
use shopkeep_core::domain::conversation::{RequestedAction, Turn};
use shopkeep_core::domain::customer::CustomerContext;
use shopkeep_core::errors::DialogueError;

/// Everything a reasoning call sees.
#[derive(Clone, Copy, Debug)]
pub struct ReasonerRequest<'a> {
    pub history: &'a [Turn],
    pub context: Option<&'a CustomerContext>,
    /// Appended as a trailing user message when the previous attempt was unusable.
    pub corrective_prompt: Option<&'a str>,
}

/// Raw reply from a language model, before the adapter judges it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmReply {
    pub text: Option<String>,
    pub actions: Vec<RequestedAction>,
}

impl LlmReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), actions: Vec::new() }
    }

    pub fn actions(actions: Vec<RequestedAction>) -> Self {
        Self { text: None, actions }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ReasonerRequest<'_>) -> Result<LlmReply>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReasonerOutput {
    Final(String),
    /// Tool calls plus whatever text the model wrote alongside them, which may
    /// be empty.
    ActionRequest { preamble: String, actions: Vec<RequestedAction> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReasonerSettings {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub corrective_prompt: String,
}

impl Default for ReasonerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(60),
            corrective_prompt: DEFAULT_CORRECTIVE_PROMPT.to_string(),
        }
    }
}

impl ReasonerSettings {
    pub fn from_config(agent: &AgentConfig, llm: &LlmConfig) -> Self {
        Self {
            max_attempts: agent.max_reasoner_attempts.max(1),
            timeout: Duration::from_secs(llm.timeout_secs.max(1)),
            corrective_prompt: agent.corrective_prompt.clone(),
        }
    }
}

/// Bounded-retry wrapper around one reasoning call.
///
/// An attempt is unusable when the client errors, times out, returns blank
/// text without actions, or names an action with an empty name. After
/// `max_attempts` unusable attempts the adapter gives up with
/// `DialogueError::ReasonerExhausted`.
#[derive(Clone)]
pub struct ReasonerAdapter {
    client: Arc<dyn LlmClient>,
    settings: ReasonerSettings,
}

impl ReasonerAdapter {
    pub fn new(client: Arc<dyn LlmClient>, settings: ReasonerSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &ReasonerSettings {
        &self.settings
    }

    pub async fn reason(
        &self,
        history: &[Turn],
        context: Option<&CustomerContext>,
    ) -> Result<ReasonerOutput, DialogueError> {
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let request = ReasonerRequest {
                history,
                context,
                corrective_prompt: (attempt > 1)
                    .then_some(self.settings.corrective_prompt.as_str()),
            };

            let completion = self.client.complete(request);
            let reply = match tokio::time::timeout(self.settings.timeout, completion).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(error)) => {
                    warn!(
                        event_name = "reasoner.attempt.failed",
                        attempt,
                        error = %error,
                        "reasoner call failed"
                    );
                    continue;
                }
                Err(_) => {
                    warn!(
                        event_name = "reasoner.attempt.timed_out",
                        attempt,
                        timeout_ms = self.settings.timeout.as_millis() as u64,
                        "reasoner call timed out"
                    );
                    continue;
                }
            };

            match interpret(reply) {
                Some(output) => return Ok(output),
                None => warn!(
                    event_name = "reasoner.attempt.empty",
                    attempt,
                    "reasoner returned no usable output"
                ),
            }
        }

        Err(DialogueError::ReasonerExhausted { attempts: max_attempts })
    }
}

fn interpret(reply: LlmReply) -> Option<ReasonerOutput> {
    if !reply.actions.is_empty() {
        if reply.actions.iter().any(|action| action.name.trim().is_empty()) {
            return None;
        }
        let preamble = reply.text.map(|text| text.trim().to_string()).unwrap_or_default();
        return Some(ReasonerOutput::ActionRequest { preamble, actions: reply.actions });
    }

    reply
        .text
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .map(ReasonerOutput::Final)
}
