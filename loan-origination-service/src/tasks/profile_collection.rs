use async_trait::async_trait;
use origination_flow::{ConversationState, DataPatch, Result, Stage, StageResult, StageTask, Turn};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::services::records::{AuditEntry, LoanApplicationRecord, RecordStore, record_audit};
use crate::tasks::session_keys;

use super::types::ProfileField;
use super::utils::{MINIMUM_MONTHLY_INCOME, parse_income};

pub const ASK_NAME: &str = "Hello! I'm your personal loan assistant. May I know your name to get started?";
pub const ASK_INCOME: &str = "Great! Now, could you please tell me your monthly income in INR?";
pub const ASK_EMPLOYMENT: &str =
    "Thank you! What is your employment type? (e.g., Salaried, Self-Employed, Business, Professional)";
pub const ASK_DOCUMENT: &str = "Perfect! Now I need to verify your identity. Please upload a photo of your PAN card or Aadhaar card for KYC verification.";
pub const INVALID_INCOME: &str = "Please enter a valid monthly income amount in numbers (e.g., 50000)";
pub const BELOW_MINIMUM_INCOME: &str =
    "The minimum monthly income requirement is ₹10,000. Please enter a valid monthly income.";
pub const ASK_PENDING: &str = "Please provide the requested information.";

/// Collects name, monthly income and employment type, then opens the application
pub struct ProfileCollectionTask {
    records: Arc<dyn RecordStore>,
}

impl ProfileCollectionTask {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    fn collect_name(&self, message: &str) -> StageResult {
        let name = message.trim();
        if name.is_empty() {
            return StageResult::new(ASK_NAME);
        }

        info!(name = %name, "Applicant introduced themselves");
        let response = format!(
            "Nice to meet you, {name}! 😊\n\n\
             I'm here to help you get a personal loan quickly. \
             We offer competitive interest rates starting from 10.5% with flexible repayment options.\n\n\
             {ASK_INCOME}"
        );

        StageResult::new(response)
            .with_next_stage(Stage::CollectInfo)
            .with_patch(DataPatch::new().set(session_keys::NAME, name))
    }

    fn collect_income(&self, message: &str) -> StageResult {
        let Some(income) = parse_income(message) else {
            return StageResult::new(INVALID_INCOME).with_next_stage(Stage::CollectInfo);
        };

        if income < MINIMUM_MONTHLY_INCOME {
            info!(income, "Income below the minimum requirement");
            return StageResult::new(BELOW_MINIMUM_INCOME).with_next_stage(Stage::CollectInfo);
        }

        StageResult::new(ASK_EMPLOYMENT)
            .with_next_stage(Stage::CollectInfo)
            .with_patch(DataPatch::new().set(session_keys::INCOME, income))
    }

    async fn collect_employment(&self, turn: &Turn, state: &ConversationState) -> StageResult {
        let employment_type = turn.message.trim();
        let income: f64 = state.data.get(session_keys::INCOME).unwrap_or(0.0);

        let mut result = StageResult::new(ASK_DOCUMENT)
            .with_next_stage(Stage::Kyc)
            .with_patch(DataPatch::new().set(session_keys::EMPLOYMENT_TYPE, employment_type));

        let record = LoanApplicationRecord::pending(&turn.user_id, income, employment_type);
        match self.records.create_application(record).await {
            Ok(created) => {
                info!(
                    user_id = %turn.user_id,
                    application_id = %created.id,
                    "Loan application created"
                );
                result = result.with_application_id(created.id);
            }
            Err(e) => {
                // The conversation continues without a bound application
                warn!(user_id = %turn.user_id, error = %e, "Failed to create loan application");
            }
        }

        result
    }
}

#[async_trait]
impl StageTask for ProfileCollectionTask {
    async fn run(&self, turn: &Turn, state: &ConversationState) -> Result<StageResult> {
        info!("running task: {}", self.id());

        record_audit(
            self.records.as_ref(),
            AuditEntry::new(
                &turn.user_id,
                "sales_interaction",
                "ProfileCollection",
                json!({ "message": turn.message }),
            ),
        )
        .await;

        let result = match ProfileField::first_missing(&state.data) {
            Some(ProfileField::Name) => self.collect_name(&turn.message),
            Some(ProfileField::Income) => self.collect_income(&turn.message),
            Some(ProfileField::EmploymentType) => self.collect_employment(turn, state).await,
            None => StageResult::new(ASK_PENDING).with_next_stage(Stage::CollectInfo),
        };

        Ok(result)
    }
}
