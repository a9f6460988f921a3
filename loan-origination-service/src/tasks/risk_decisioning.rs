use async_trait::async_trait;
use origination_flow::{
    Chain, ConversationState, DataPatch, Result, Stage, StageResult, StageTask, Turn,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::scoring::{CreditScorer, EligibilityAssessment, decide, eligibility};
use crate::services::records::{
    ApplicationStatus, ApplicationUpdate, AuditEntry, RecordStore, record_audit,
};
use crate::tasks::session_keys;

use super::utils::{format_amount, format_rate};

pub const APPROVED_MESSAGE: &str = "🎉 Congratulations! Your loan application has been APPROVED!";
pub const REVIEW_MESSAGE: &str =
    "📋 Your application is under REVIEW. Our team will contact you within 24 hours.";
pub const REJECTED_MESSAGE: &str =
    "😔 We're sorry, but we cannot approve your loan application at this time.";

/// Scores the applicant and decides the application
pub struct RiskDecisioningTask {
    scorer: Arc<CreditScorer>,
    records: Arc<dyn RecordStore>,
}

impl RiskDecisioningTask {
    pub fn new(scorer: Arc<CreditScorer>, records: Arc<dyn RecordStore>) -> Self {
        Self { scorer, records }
    }

    async fn persist_decision(&self, state: &ConversationState, update: ApplicationUpdate) {
        let Some(application_id) = state.application_id.as_deref() else {
            debug!(user_id = %state.user_id, "No application bound, skipping decision update");
            return;
        };

        if let Err(e) = self.records.update_application(application_id, update).await {
            warn!(
                user_id = %state.user_id,
                application_id = %application_id,
                error = %e,
                "Failed to persist underwriting decision"
            );
        }
    }
}

fn decision_narrative(
    status: ApplicationStatus,
    credit_score: u32,
    terms: &EligibilityAssessment,
) -> String {
    let headline = match status {
        ApplicationStatus::Approved => APPROVED_MESSAGE,
        ApplicationStatus::Review => REVIEW_MESSAGE,
        _ => REJECTED_MESSAGE,
    };

    let closing = if status == ApplicationStatus::Approved {
        "I'll now generate your sanction letter. Please wait a moment..."
    } else {
        "Thank you for applying with us. You can start a new application anytime from your dashboard."
    };

    format!(
        "{headline}\n\n\
         📊 **Application Details:**\n\
         • Credit Score: {credit_score}\n\
         • Approved Amount: ₹{}\n\
         • Interest Rate: {}% per annum\n\
         • Tenure: {} months\n\
         • Risk Level: {}\n\n\
         {closing}",
        format_amount(terms.max_loan_amount),
        format_rate(terms.interest_rate),
        terms.tenure_months,
        terms.risk_level,
    )
}

#[async_trait]
impl StageTask for RiskDecisioningTask {
    async fn run(&self, turn: &Turn, state: &ConversationState) -> Result<StageResult> {
        info!("running task: {}", self.id());

        let income: f64 = state.data.get(session_keys::INCOME).unwrap_or(0.0);
        let employment_type = state
            .data
            .get_str(session_keys::EMPLOYMENT_TYPE)
            .unwrap_or("other");

        let credit_score = self.scorer.credit_score(income, employment_type);
        let terms = eligibility(income, credit_score);
        let status = decide(income, credit_score);

        info!(
            user_id = %turn.user_id,
            credit_score,
            status = %status,
            risk_level = %terms.risk_level,
            "Underwriting decision made"
        );

        self.persist_decision(
            state,
            ApplicationUpdate {
                credit_score,
                loan_amount: terms.max_loan_amount,
                interest_rate: terms.interest_rate,
                status,
            },
        )
        .await;

        record_audit(
            self.records.as_ref(),
            AuditEntry::new(
                &turn.user_id,
                "underwriting_decision",
                "RiskDecisioning",
                json!({
                    "credit_score": credit_score,
                    "status": status,
                    "loan_amount": terms.max_loan_amount,
                }),
            ),
        )
        .await;

        let patch = DataPatch::new()
            .set(session_keys::CREDIT_SCORE, credit_score)
            .set(session_keys::LOAN_AMOUNT, terms.max_loan_amount)
            .set(session_keys::INTEREST_RATE, terms.interest_rate)
            .set(session_keys::TENURE_MONTHS, terms.tenure_months)
            .set(session_keys::STATUS, status.as_str());

        let result =
            StageResult::new(decision_narrative(status, credit_score, &terms)).with_patch(patch);

        Ok(match status {
            ApplicationStatus::Approved => result
                .with_next_stage(Stage::Sanction)
                .with_chain(Chain::Issuance),
            _ => result.with_next_stage(Stage::Complete),
        })
    }
}
