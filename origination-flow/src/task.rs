use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{context::DataPatch, error::Result, stage::Stage, storage::ConversationState};

/// One user message plus whatever came with it
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub user_id: String,
    pub message: String,
    pub has_attachment: bool,
    /// Raw bytes of the uploaded document, when the transport carried them
    pub attachment: Option<Vec<u8>>,
}

impl Turn {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            has_attachment: false,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Option<Vec<u8>>) -> Self {
        self.has_attachment = true;
        self.attachment = attachment;
        self
    }

    /// The turn as seen by a task invoked through an auto-chain: same user, no new input.
    pub fn chained(&self) -> Self {
        Self::new(self.user_id.clone(), String::new())
    }
}

/// Signal that the next stage's task should run within the same turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chain {
    Decisioning,
    Issuance,
}

impl Chain {
    pub fn target_stage(&self) -> Stage {
        match self {
            Chain::Decisioning => Stage::Underwriting,
            Chain::Issuance => Stage::Sanction,
        }
    }
}

/// Result of a stage task execution
#[derive(Debug, Clone, Default)]
pub struct StageResult {
    /// Response to send to the user
    pub response: String,
    /// Stage to move to; `None` keeps the current one
    pub next_stage: Option<Stage>,
    pub patch: DataPatch,
    /// External application record to bind to the conversation
    pub application_id: Option<String>,
    pub chain: Option<Chain>,
    /// Structured data returned alongside the response text
    pub payload: Option<Value>,
}

impl StageResult {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn with_next_stage(mut self, stage: Stage) -> Self {
        self.next_stage = Some(stage);
        self
    }

    pub fn with_patch(mut self, patch: DataPatch) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Core trait that every stage task implements.
///
/// Tasks read the conversation state but never mutate it; all changes travel
/// back in the [`StageResult`] and are applied by the orchestrator once the
/// task has succeeded.
#[async_trait]
pub trait StageTask: Send + Sync {
    /// Identifier used in logs
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, turn: &Turn, state: &ConversationState) -> Result<StageResult>;
}
