use origination_flow::{ConversationStore, Orchestrator, Stage, TurnRunner};
use std::sync::Arc;

use crate::services::Collaborators;
use crate::tasks::*;

/// Stage routing for the loan origination conversation
pub fn build_loan_workflow(
    collaborators: &Collaborators,
    store: Arc<dyn ConversationStore>,
) -> Orchestrator {
    let profile_collection = Arc::new(ProfileCollectionTask::new(collaborators.records.clone()));
    let identity_verification = Arc::new(IdentityVerificationTask::new(
        collaborators.extractor.clone(),
        collaborators.records.clone(),
    ));
    let risk_decisioning = Arc::new(RiskDecisioningTask::new(
        collaborators.scorer.clone(),
        collaborators.records.clone(),
    ));
    let document_issuance = Arc::new(DocumentIssuanceTask::new(
        collaborators.renderer.clone(),
        collaborators.records.clone(),
    ));

    Orchestrator::builder()
        .add_task_for(&[Stage::Greeting, Stage::CollectInfo], profile_collection)
        .add_task(Stage::Kyc, identity_verification)
        .add_task(Stage::Underwriting, risk_decisioning)
        .add_task(Stage::Sanction, document_issuance)
        .build(store)
}

pub fn create_turn_runner(
    collaborators: &Collaborators,
    store: Arc<dyn ConversationStore>,
) -> TurnRunner {
    TurnRunner::new(Arc::new(build_loan_workflow(collaborators, store)))
}
