use async_trait::async_trait;
use origination_flow::{
    Chain, ConversationState, DataPatch, FlowError, Result, Stage, StageResult, StageTask, Turn,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::services::extraction::{DocumentExtractor, DocumentType, ExtractionError};
use crate::services::records::{
    AuditEntry, KycDocumentRecord, RecordStore, record_audit, record_kyc_document,
};
use crate::tasks::session_keys;

pub const ASK_UPLOAD: &str = "Please upload your PAN card or Aadhaar card image for verification. Click the upload button to select a file.";
const RETRY_UPLOAD: &str = "Please upload a clear image of your PAN or Aadhaar card.";
/// File name stored for documents that arrive as a chat attachment
pub const CHAT_ATTACHMENT_NAME: &str = "chat_attachment";

/// KYC: reads the uploaded identity document and checks it is acceptable
pub struct IdentityVerificationTask {
    extractor: Arc<dyn DocumentExtractor>,
    records: Arc<dyn RecordStore>,
}

impl IdentityVerificationTask {
    pub fn new(extractor: Arc<dyn DocumentExtractor>, records: Arc<dyn RecordStore>) -> Self {
        Self { extractor, records }
    }

    fn rejected(message: &str) -> StageResult {
        StageResult::new(format!("❌ {message}\n\n{RETRY_UPLOAD}"))
    }
}

#[async_trait]
impl StageTask for IdentityVerificationTask {
    async fn run(&self, turn: &Turn, _state: &ConversationState) -> Result<StageResult> {
        info!("running task: {}", self.id());

        record_audit(
            self.records.as_ref(),
            AuditEntry::new(
                &turn.user_id,
                "kyc_verification",
                "IdentityVerification",
                json!({ "has_attachment": turn.has_attachment }),
            ),
        )
        .await;

        if !turn.has_attachment {
            return Ok(StageResult::new(ASK_UPLOAD));
        }

        let image = turn.attachment.as_deref().unwrap_or_default();
        let extraction = match self.extractor.extract(image, DocumentType::Pan).await {
            Ok(extraction) => extraction,
            Err(ExtractionError::EmptyImage) => {
                warn!(user_id = %turn.user_id, "Attachment flagged but no image bytes received");
                return Ok(Self::rejected(&ExtractionError::EmptyImage.to_string()));
            }
            Err(e) => return Err(FlowError::StageFailed(e.to_string())),
        };

        let validation = self.extractor.validate(&extraction, DocumentType::Pan);
        record_kyc_document(
            self.records.as_ref(),
            KycDocumentRecord::new(
                &turn.user_id,
                DocumentType::Pan,
                CHAT_ATTACHMENT_NAME,
                &extraction,
                &validation,
            ),
        )
        .await;

        if !validation.valid {
            info!(
                user_id = %turn.user_id,
                reason = %validation.message,
                "Identity document rejected"
            );
            return Ok(Self::rejected(&validation.message));
        }

        info!(
            user_id = %turn.user_id,
            document_type = %validation.document_type,
            confidence = ?extraction.confidence,
            "Identity verified"
        );

        let response = format!(
            "✅ {}\n\n\
             Great! Your KYC verification is complete. Now let me process your loan application...\n\n\
             Please wait a moment while I check your eligibility...",
            validation.message
        );

        Ok(StageResult::new(response)
            .with_next_stage(Stage::Underwriting)
            .with_patch(DataPatch::new().set(session_keys::KYC_VERIFIED, true))
            .with_chain(Chain::Decisioning))
    }
}
