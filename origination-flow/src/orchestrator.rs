use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    error::{FlowError, Result},
    stage::Stage,
    storage::{ConversationState, ConversationStore},
    task::{StageResult, StageTask, Turn},
};

/// Upper bound on tasks invoked through auto-chaining within a single turn
pub const MAX_CHAINED_INVOCATIONS: usize = 3;

pub const RESTART_MESSAGE: &str =
    "I apologize, but something went wrong. Let's start over. What's your name?";

/// What a turn produced once every chained task has run
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Responses of every task that ran, separated by blank lines
    pub response: String,
    /// Last structured payload produced during the turn
    pub payload: Option<Value>,
    /// Stage the conversation is left in
    pub stage: Stage,
    /// Number of tasks invoked through auto-chaining
    pub chained: usize,
}

/// Routes turns to the task registered for the conversation's current stage
pub struct Orchestrator {
    tasks: HashMap<Stage, Arc<dyn StageTask>>,
    store: Arc<dyn ConversationStore>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn task_for(&self, stage: Stage) -> Option<Arc<dyn StageTask>> {
        self.tasks.get(&stage).cloned()
    }

    /// Existing state for the user, or a fresh greeting state (not persisted until applied)
    pub async fn get_or_create(&self, user_id: &str) -> Result<ConversationState> {
        Ok(self
            .store
            .get(user_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(user_id)))
    }

    /// Execute one turn: the current stage's task plus any tasks it chains into
    pub async fn route(&self, turn: &Turn) -> Result<TurnOutcome> {
        let mut state = match self.get_or_create(&turn.user_id).await {
            Ok(state) => state,
            Err(FlowError::UnknownStage(raw)) => {
                warn!(
                    user_id = %turn.user_id,
                    stage = %raw,
                    "Stored conversation has an unknown stage"
                );
                return self.restart(&turn.user_id).await;
            }
            Err(e) => return Err(e),
        };

        let Some(task) = self.task_for(state.stage) else {
            warn!(user_id = %turn.user_id, stage = %state.stage, "No task routes this stage");
            return self.restart(&turn.user_id).await;
        };

        debug!(user_id = %turn.user_id, stage = %state.stage, task = %task.id(), "Routing turn");

        let mut last_stage = state.stage;
        let result = task.run(turn, &state).await?;

        let mut response = result.response.clone();
        let mut payload = result.payload.clone();
        let mut chain = result.chain;
        self.apply(&mut state, result).await?;

        let mut chained = 0;
        while let Some(signal) = chain.take() {
            let target = signal.target_stage();

            if chained >= MAX_CHAINED_INVOCATIONS {
                warn!(user_id = %turn.user_id, ?signal, "Auto-chain limit reached, halting");
                break;
            }
            if target <= last_stage {
                warn!(
                    user_id = %turn.user_id,
                    ?signal,
                    from = %last_stage,
                    "Auto-chain would move backwards, halting"
                );
                break;
            }
            if state.stage != target {
                warn!(
                    user_id = %turn.user_id,
                    ?signal,
                    stage = %state.stage,
                    "Auto-chain signal does not match the applied stage, halting"
                );
                break;
            }
            let Some(next_task) = self.task_for(target) else {
                warn!(user_id = %turn.user_id, stage = %target, "No task to chain into, halting");
                break;
            };

            info!(
                user_id = %turn.user_id,
                stage = %target,
                task = %next_task.id(),
                "Auto-chaining"
            );

            let result = next_task.run(&turn.chained(), &state).await?;
            chained += 1;
            last_stage = target;

            if !result.response.is_empty() {
                response.push_str("\n\n");
                response.push_str(&result.response);
            }
            if result.payload.is_some() {
                payload = result.payload.clone();
            }
            chain = result.chain;
            self.apply(&mut state, result).await?;
        }

        Ok(TurnOutcome {
            response,
            payload,
            stage: state.stage,
            chained,
        })
    }

    /// Apply a task's result to the state and persist it.
    ///
    /// A terminal stage deletes the conversation instead of saving it.
    pub async fn apply(&self, state: &mut ConversationState, result: StageResult) -> Result<()> {
        if let Some(stage) = result.next_stage {
            state.stage = stage;
        }
        state.data.merge(result.patch);
        if let Some(application_id) = result.application_id {
            state.application_id = Some(application_id);
        }

        if state.stage.is_terminal() {
            debug!(
                user_id = %state.user_id,
                "Conversation reached a terminal stage, clearing state"
            );
            self.store.delete(&state.user_id).await
        } else {
            self.store.put(state.clone()).await
        }
    }

    async fn restart(&self, user_id: &str) -> Result<TurnOutcome> {
        self.store.delete(user_id).await?;
        Ok(TurnOutcome {
            response: RESTART_MESSAGE.to_string(),
            payload: None,
            stage: Stage::Greeting,
            chained: 0,
        })
    }
}

/// Builder for creating orchestrators
pub struct OrchestratorBuilder {
    tasks: HashMap<Stage, Arc<dyn StageTask>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn add_task(mut self, stage: Stage, task: Arc<dyn StageTask>) -> Self {
        self.tasks.insert(stage, task);
        self
    }

    /// Register one task for several stages
    pub fn add_task_for(mut self, stages: &[Stage], task: Arc<dyn StageTask>) -> Self {
        for stage in stages {
            self.tasks.insert(*stage, task.clone());
        }
        self
    }

    pub fn build(self, store: Arc<dyn ConversationStore>) -> Orchestrator {
        Orchestrator {
            tasks: self.tasks,
            store,
        }
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
