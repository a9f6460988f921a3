use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{context::ApplicantData, error::Result, stage::Stage};

/// Per-user scratch state for one in-flight application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub user_id: String,
    pub stage: Stage,
    pub data: ApplicantData,
    pub application_id: Option<String>,
}

impl ConversationState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            stage: Stage::Greeting,
            data: ApplicantData::new(),
            application_id: None,
        }
    }
}

/// Keyed store for conversation state.
///
/// Implementations decoding state from an external representation should
/// report an unrecognised stage as [`crate::FlowError::UnknownStage`]; the
/// orchestrator treats that as a corrupted conversation and restarts it.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<ConversationState>>;
    async fn put(&self, state: ConversationState) -> Result<()>;
    async fn delete(&self, user_id: &str) -> Result<()>;
}

/// In-memory implementation of ConversationStore
#[derive(Clone, Default)]
pub struct InMemoryConversationStore {
    states: Arc<DashMap<String, ConversationState>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            states: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, user_id: &str) -> Result<Option<ConversationState>> {
        Ok(self.states.get(user_id).map(|entry| entry.clone()))
    }

    async fn put(&self, state: ConversationState) -> Result<()> {
        self.states.insert(state.user_id.clone(), state);
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.states.remove(user_id);
        Ok(())
    }
}
