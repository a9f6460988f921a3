pub mod context;
pub mod error;
pub mod orchestrator;
pub mod runner;
pub mod stage;
pub mod storage;
pub mod task;

// Re-export commonly used types
pub use context::{ApplicantData, DataPatch};
pub use error::{FlowError, Result};
pub use orchestrator::{
    MAX_CHAINED_INVOCATIONS, Orchestrator, OrchestratorBuilder, RESTART_MESSAGE, TurnOutcome,
};
pub use runner::TurnRunner;
pub use stage::Stage;
pub use storage::{ConversationState, ConversationStore, InMemoryConversationStore};
pub use task::{Chain, StageResult, StageTask, Turn};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct NameTask;

    #[async_trait]
    impl StageTask for NameTask {
        async fn run(&self, turn: &Turn, _state: &ConversationState) -> Result<StageResult> {
            Ok(StageResult::new(format!("Hello, {}", turn.message))
                .with_next_stage(Stage::CollectInfo)
                .with_patch(DataPatch::new().set("name", turn.message.clone())))
        }
    }

    /// Moves to `next`, optionally signalling a chain
    struct StepTask {
        reply: &'static str,
        next: Stage,
        chain: Option<Chain>,
    }

    #[async_trait]
    impl StageTask for StepTask {
        async fn run(&self, _turn: &Turn, _state: &ConversationState) -> Result<StageResult> {
            let mut result = StageResult::new(self.reply).with_next_stage(self.next);
            if let Some(chain) = self.chain {
                result = result.with_chain(chain);
            }
            Ok(result)
        }
    }

    struct FailingTask;

    #[async_trait]
    impl StageTask for FailingTask {
        async fn run(&self, _turn: &Turn, _state: &ConversationState) -> Result<StageResult> {
            Err(FlowError::StageFailed("renderer unavailable".to_string()))
        }
    }

    struct CorruptedStore;

    #[async_trait]
    impl ConversationStore for CorruptedStore {
        async fn get(&self, _user_id: &str) -> Result<Option<ConversationState>> {
            Err(FlowError::UnknownStage("disbursal".to_string()))
        }
        async fn put(&self, _state: ConversationState) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _user_id: &str) -> Result<()> {
            Ok(())
        }
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl ConversationStore for ReadOnlyStore {
        async fn get(&self, _user_id: &str) -> Result<Option<ConversationState>> {
            Ok(None)
        }
        async fn put(&self, _state: ConversationState) -> Result<()> {
            Err(FlowError::StorageError("read-only".to_string()))
        }
        async fn delete(&self, _user_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn step(reply: &'static str, next: Stage, chain: Option<Chain>) -> Arc<dyn StageTask> {
        Arc::new(StepTask { reply, next, chain })
    }

    async fn state_at(store: &InMemoryConversationStore, user_id: &str, stage: Stage) {
        let mut state = ConversationState::new(user_id);
        state.stage = stage;
        store.put(state).await.unwrap();
    }

    #[tokio::test]
    async fn test_route_dispatches_on_current_stage() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder()
            .add_task_for(&[Stage::Greeting, Stage::CollectInfo], Arc::new(NameTask))
            .build(store.clone());

        let outcome = orchestrator.route(&Turn::new("u1", "Alice")).await.unwrap();

        assert_eq!(outcome.response, "Hello, Alice");
        assert_eq!(outcome.stage, Stage::CollectInfo);
        assert_eq!(outcome.chained, 0);

        let state = store.get("u1").await.unwrap().unwrap();
        assert_eq!(state.stage, Stage::CollectInfo);
        assert_eq!(state.data.get_str("name"), Some("Alice"));
    }

    #[tokio::test]
    async fn test_get_or_create_returns_identical_initial_states() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder().build(store.clone());

        let first = orchestrator.get_or_create("new-user").await.unwrap();
        let second = orchestrator.get_or_create("new-user").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.stage, Stage::Greeting);
        assert!(first.data.is_empty());
        assert!(first.application_id.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_auto_chain_runs_decisioning_then_issuance() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Kyc, step("verified", Stage::Underwriting, Some(Chain::Decisioning)))
            .add_task(Stage::Underwriting, step("approved", Stage::Sanction, Some(Chain::Issuance)))
            .add_task(Stage::Sanction, step("issued", Stage::Complete, None))
            .build(store.clone());
        state_at(&store, "u1", Stage::Kyc).await;

        let outcome = orchestrator.route(&Turn::new("u1", "")).await.unwrap();

        assert_eq!(outcome.response, "verified\n\napproved\n\nissued");
        assert_eq!(outcome.chained, 2);
        assert_eq!(outcome.stage, Stage::Complete);
        assert!(store.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_stops_when_decision_does_not_signal() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Kyc, step("verified", Stage::Underwriting, Some(Chain::Decisioning)))
            .add_task(Stage::Underwriting, step("under review", Stage::Complete, None))
            .add_task(Stage::Sanction, Arc::new(FailingTask))
            .build(store.clone());
        state_at(&store, "u1", Stage::Kyc).await;

        let outcome = orchestrator.route(&Turn::new("u1", "")).await.unwrap();

        assert_eq!(outcome.response, "verified\n\nunder review");
        assert_eq!(outcome.chained, 1);
        assert!(store.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_never_moves_backwards() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Sanction, step("again", Stage::Underwriting, Some(Chain::Decisioning)))
            .add_task(Stage::Underwriting, Arc::new(FailingTask))
            .build(store.clone());
        state_at(&store, "u1", Stage::Sanction).await;

        let outcome = orchestrator.route(&Turn::new("u1", "")).await.unwrap();

        assert_eq!(outcome.response, "again");
        assert_eq!(outcome.chained, 0);
    }

    #[tokio::test]
    async fn test_chain_halts_when_signal_disagrees_with_stage() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Kyc, step("still waiting", Stage::Kyc, Some(Chain::Decisioning)))
            .add_task(Stage::Underwriting, Arc::new(FailingTask))
            .build(store.clone());
        state_at(&store, "u1", Stage::Kyc).await;

        let outcome = orchestrator.route(&Turn::new("u1", "")).await.unwrap();

        assert_eq!(outcome.chained, 0);
        assert_eq!(outcome.stage, Stage::Kyc);
    }

    #[tokio::test]
    async fn test_failed_chained_task_keeps_previous_state() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Underwriting, step("approved", Stage::Sanction, Some(Chain::Issuance)))
            .add_task(Stage::Sanction, Arc::new(FailingTask))
            .build(store.clone());
        state_at(&store, "u1", Stage::Underwriting).await;

        let err = orchestrator.route(&Turn::new("u1", "")).await.unwrap_err();
        assert!(matches!(err, FlowError::StageFailed(_)));

        let state = store.get("u1").await.unwrap().unwrap();
        assert_eq!(state.stage, Stage::Sanction);
    }

    #[tokio::test]
    async fn test_unrouted_stage_restarts_conversation() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Greeting, Arc::new(NameTask))
            .build(store.clone());
        state_at(&store, "u1", Stage::Complete).await;

        let outcome = orchestrator.route(&Turn::new("u1", "hi")).await.unwrap();

        assert_eq!(outcome.response, RESTART_MESSAGE);
        assert_eq!(outcome.stage, Stage::Greeting);
        assert!(store.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_stage_restarts_conversation() {
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Greeting, Arc::new(NameTask))
            .build(Arc::new(CorruptedStore));

        let outcome = orchestrator.route(&Turn::new("u1", "hi")).await.unwrap();

        assert_eq!(outcome.response, RESTART_MESSAGE);
        assert_eq!(outcome.stage, Stage::Greeting);
    }

    #[tokio::test]
    async fn test_storage_failure_fails_the_turn() {
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Greeting, Arc::new(NameTask))
            .build(Arc::new(ReadOnlyStore));

        let err = orchestrator.route(&Turn::new("u1", "Alice")).await.unwrap_err();
        assert!(matches!(err, FlowError::StorageError(_)));
    }

    #[tokio::test]
    async fn test_apply_binds_application_id_and_payload_survives() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder().build(store.clone());
        let mut state = orchestrator.get_or_create("u1").await.unwrap();

        let result = StageResult::new("ok")
            .with_next_stage(Stage::Kyc)
            .with_application_id("app-1")
            .with_payload(json!({ "k": "v" }));
        orchestrator.apply(&mut state, result).await.unwrap();

        let stored = store.get("u1").await.unwrap().unwrap();
        assert_eq!(stored.application_id.as_deref(), Some("app-1"));
        assert_eq!(stored.stage, Stage::Kyc);
    }

    struct CounterTask;

    #[async_trait]
    impl StageTask for CounterTask {
        async fn run(&self, _turn: &Turn, state: &ConversationState) -> Result<StageResult> {
            let count: u64 = state.data.get("count").unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(StageResult::new("counted").with_patch(DataPatch::new().set("count", count + 1)))
        }
    }

    #[tokio::test]
    async fn test_runner_serializes_turns_for_one_user() {
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::builder()
            .add_task(Stage::Greeting, Arc::new(CounterTask))
            .build(store.clone());
        let runner = TurnRunner::new(Arc::new(orchestrator));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let runner = runner.clone();
                tokio::spawn(async move { runner.run(Turn::new("same-user", "+1")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = store.get("same-user").await.unwrap().unwrap();
        assert_eq!(state.data.get::<u64>("count"), Some(10));
        assert_eq!(runner.active_users(), 0);
    }
}
