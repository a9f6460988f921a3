use async_trait::async_trait;
use chrono::Utc;
use origination_flow::{ConversationState, FlowError, Result, Stage, StageResult, StageTask, Turn};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::services::records::{AuditEntry, RecordStore, record_audit};
use crate::services::rendering::{DocumentRenderer, SanctionLetter, artifact_name};
use crate::tasks::session_keys;

pub const PLACEHOLDER_NAME: &str = "Valued Customer";

const ISSUED_MESSAGE: &str = "✅ **Sanction Letter Generated!**\n\n\
Your loan has been sanctioned. The sanction letter has been generated with all the details.\n\n\
**Next Steps:**\n\
1. Download and review your sanction letter\n\
2. Our team will contact you within 24 hours\n\
3. Complete the final documentation\n\
4. Receive your loan amount in your bank account\n\n\
Thank you for choosing our services! 🎉";

/// Renders the sanction letter for an approved application
pub struct DocumentIssuanceTask {
    renderer: Arc<dyn DocumentRenderer>,
    records: Arc<dyn RecordStore>,
}

impl DocumentIssuanceTask {
    pub fn new(renderer: Arc<dyn DocumentRenderer>, records: Arc<dyn RecordStore>) -> Self {
        Self { renderer, records }
    }

    /// Conversation data first, then the stored profile, then a placeholder
    async fn applicant_name(&self, state: &ConversationState) -> String {
        if let Some(name) = state.data.get_str(session_keys::NAME) {
            return name.to_string();
        }

        match self.records.get_user(&state.user_id).await {
            Ok(Some(profile)) => profile.name,
            Ok(None) => PLACEHOLDER_NAME.to_string(),
            Err(e) => {
                warn!(user_id = %state.user_id, error = %e, "User profile lookup failed");
                PLACEHOLDER_NAME.to_string()
            }
        }
    }
}

#[async_trait]
impl StageTask for DocumentIssuanceTask {
    async fn run(&self, turn: &Turn, state: &ConversationState) -> Result<StageResult> {
        info!("running task: {}", self.id());

        let now = Utc::now();
        let letter = SanctionLetter {
            applicant_name: self.applicant_name(state).await,
            loan_amount: state.data.get(session_keys::LOAN_AMOUNT).unwrap_or(0.0),
            interest_rate: state.data.get(session_keys::INTEREST_RATE).unwrap_or(0.0),
            tenure_months: state.data.get(session_keys::TENURE_MONTHS).unwrap_or(0),
            credit_score: state.data.get(session_keys::CREDIT_SCORE).unwrap_or(0),
            issued_at: now,
        };

        let name = artifact_name(&turn.user_id, now);
        let handle = self
            .renderer
            .render(&name, &letter)
            .await
            .map_err(|e| FlowError::StageFailed(format!("sanction letter rendering failed: {e}")))?;

        record_audit(
            self.records.as_ref(),
            AuditEntry::new(
                &turn.user_id,
                "sanction_letter_generated",
                "DocumentIssuance",
                json!({ "pdf_filename": handle.name }),
            ),
        )
        .await;

        info!(user_id = %turn.user_id, artifact = %handle.name, "Sanction letter issued");

        Ok(StageResult::new(ISSUED_MESSAGE)
            .with_next_stage(Stage::Complete)
            .with_payload(json!({ "sanction_letter_url": handle.url })))
    }
}
