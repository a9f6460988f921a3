use async_trait::async_trait;
use loan_origination_service::{
    AppState, ChatRequest, ChatResponse, Collaborators, GENERIC_APOLOGY, handle_chat,
    scoring::CreditScorer,
    services::extraction::{DocumentExtractor, DocumentType, Extraction, ExtractionError},
    services::records::{
        ApplicationStatus, ApplicationUpdate, AuditEntry, InMemoryRecordStore, KycDocumentRecord,
        LoanApplicationRecord, RecordStore, RecordStoreError, UserProfile, ValidationStatus,
    },
    services::rendering::DocumentRenderer,
    tasks::session_keys,
};
use origination_flow::{ConversationStore, InMemoryConversationStore, Stage};
use std::sync::Arc;

struct Harness {
    state: AppState,
    conversations: Arc<InMemoryConversationStore>,
    records: Arc<InMemoryRecordStore>,
    _letters: tempfile::TempDir,
}

impl Harness {
    fn new(jitter: i32) -> Self {
        Self::with_extractor(jitter, None)
    }

    fn with_extractor(jitter: i32, extractor: Option<Arc<dyn DocumentExtractor>>) -> Self {
        let letters = tempfile::tempdir().unwrap();
        let records = Arc::new(InMemoryRecordStore::new());
        let mut collaborators =
            Collaborators::in_memory(letters.path(), CreditScorer::with_fixed_jitter(jitter));
        collaborators.records = records.clone();
        if let Some(extractor) = extractor {
            collaborators.extractor = extractor;
        }

        let conversations = Arc::new(InMemoryConversationStore::new());
        Self {
            state: AppState::new(collaborators, conversations.clone()),
            conversations,
            records,
            _letters: letters,
        }
    }

    async fn say(&self, user_id: &str, message: &str) -> ChatResponse {
        self.send(user_id, message, false).await
    }

    async fn upload(&self, user_id: &str) -> ChatResponse {
        self.send(user_id, "", true).await
    }

    async fn send(&self, user_id: &str, message: &str, has_file: bool) -> ChatResponse {
        handle_chat(
            &self.state.runner,
            ChatRequest {
                message: message.to_string(),
                user_id: user_id.to_string(),
                has_file,
                attachment_base64: None,
            },
        )
        .await
    }

    async fn stage(&self, user_id: &str) -> Option<Stage> {
        self.conversations
            .get(user_id)
            .await
            .unwrap()
            .map(|state| state.stage)
    }
}

struct UnreachableExtractor;

#[async_trait]
impl DocumentExtractor for UnreachableExtractor {
    async fn extract(
        &self,
        _image: &[u8],
        _document_type: DocumentType,
    ) -> Result<Extraction, ExtractionError> {
        Err(ExtractionError::InvalidResponse("gateway timeout".to_string()))
    }
}

/// Every call fails as if the database were down
struct UnavailableRecordStore;

fn unavailable<T>() -> Result<T, RecordStoreError> {
    Err(RecordStoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl RecordStore for UnavailableRecordStore {
    async fn get_user(&self, _: &str) -> Result<Option<UserProfile>, RecordStoreError> {
        unavailable()
    }

    async fn create_application(
        &self,
        _: LoanApplicationRecord,
    ) -> Result<LoanApplicationRecord, RecordStoreError> {
        unavailable()
    }

    async fn update_application(
        &self,
        _: &str,
        _: ApplicationUpdate,
    ) -> Result<LoanApplicationRecord, RecordStoreError> {
        unavailable()
    }

    async fn append_audit(&self, _: AuditEntry) -> Result<(), RecordStoreError> {
        unavailable()
    }

    async fn save_kyc_document(
        &self,
        _: KycDocumentRecord,
    ) -> Result<KycDocumentRecord, RecordStoreError> {
        unavailable()
    }

    async fn list_kyc_documents(
        &self,
        _: &str,
    ) -> Result<Vec<KycDocumentRecord>, RecordStoreError> {
        unavailable()
    }
}

#[tokio::test]
async fn test_full_conversation_ends_with_sanction_letter() {
    let harness = Harness::new(0);

    let reply = harness.say("alice", "Alice").await;
    assert!(reply.response.contains("Nice to meet you, Alice!"));
    assert!(reply.response.contains("monthly income"));
    assert_eq!(harness.stage("alice").await, Some(Stage::CollectInfo));

    let reply = harness.say("alice", "50000").await;
    assert!(reply.response.contains("employment type"));
    assert_eq!(harness.stage("alice").await, Some(Stage::CollectInfo));

    let reply = harness.say("alice", "Salaried").await;
    assert!(reply.response.contains("upload a photo of your PAN card"));
    assert_eq!(harness.stage("alice").await, Some(Stage::Kyc));

    let application_id = harness
        .conversations
        .get("alice")
        .await
        .unwrap()
        .and_then(|state| state.application_id)
        .expect("application bound after profile collection");

    let reply = harness.upload("alice").await;

    // 600 + 100 + 80 = 780
    let sections: Vec<&str> = reply.response.split("\n\n").collect();
    assert!(sections[0].starts_with("✅ PAN card verified successfully"));
    assert!(reply.response.contains("Congratulations! Your loan application has been APPROVED!"));
    assert!(reply.response.contains("• Credit Score: 780"));
    assert!(reply.response.contains("• Approved Amount: ₹600,000.00"));
    assert!(reply.response.contains("• Risk Level: LOW"));
    assert!(reply.response.contains("Sanction Letter Generated!"));

    let url = reply.data.as_ref().unwrap()["sanction_letter_url"]
        .as_str()
        .unwrap()
        .to_string();
    let name = url.strip_prefix("/api/download-sanction/").unwrap();
    let letter = harness.state.collaborators.renderer.fetch(name).await.unwrap().unwrap();
    assert!(letter.starts_with(b"%PDF"));

    assert_eq!(harness.stage("alice").await, None);

    let record = harness.records.application(&application_id).unwrap();
    assert_eq!(record.status, ApplicationStatus::Approved);
    assert_eq!(record.credit_score, Some(780));
    assert_eq!(record.loan_amount, Some(600_000.0));

    let actions: Vec<String> = harness
        .records
        .audit_entries()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(
        actions,
        [
            "sales_interaction",
            "sales_interaction",
            "sales_interaction",
            "kyc_verification",
            "underwriting_decision",
            "sanction_letter_generated",
        ]
    );

    let documents = harness.records.list_kyc_documents("alice").await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].validation_status, ValidationStatus::Verified);
}

#[tokio::test]
async fn test_unavailable_records_do_not_block_the_conversation() {
    let letters = tempfile::tempdir().unwrap();
    let mut collaborators =
        Collaborators::in_memory(letters.path(), CreditScorer::with_fixed_jitter(0));
    collaborators.records = Arc::new(UnavailableRecordStore);
    let conversations = Arc::new(InMemoryConversationStore::new());
    let state = AppState::new(collaborators, conversations.clone());

    for message in ["Alice", "50000", "Salaried"] {
        let reply = handle_chat(
            &state.runner,
            ChatRequest {
                message: message.to_string(),
                user_id: "alice".to_string(),
                has_file: false,
                attachment_base64: None,
            },
        )
        .await;
        assert_ne!(reply.response, GENERIC_APOLOGY);
    }

    let stored = conversations.get("alice").await.unwrap().unwrap();
    assert_eq!(stored.stage, Stage::Kyc);
    assert!(stored.application_id.is_none());

    let reply = handle_chat(
        &state.runner,
        ChatRequest {
            message: String::new(),
            user_id: "alice".to_string(),
            has_file: true,
            attachment_base64: None,
        },
    )
    .await;

    // No application to update; the decision and letter still go out
    assert!(reply.response.contains("APPROVED"));
    assert!(reply.response.contains("Sanction Letter Generated!"));
    assert!(reply.data.is_some());
    assert!(conversations.get("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_next_turn_after_terminal_outcome_starts_over() {
    let harness = Harness::new(0);
    for message in ["Alice", "50000", "Salaried"] {
        harness.say("alice", message).await;
    }
    harness.upload("alice").await;
    assert_eq!(harness.stage("alice").await, None);

    let reply = harness.say("alice", "Bob").await;
    assert!(reply.response.starts_with("Nice to meet you, Bob!"));

    let state = harness.conversations.get("alice").await.unwrap().unwrap();
    assert_eq!(state.stage, Stage::CollectInfo);
    assert_eq!(state.data.len(), 1);
    assert_eq!(state.data.get_str(session_keys::NAME), Some("Bob"));
    assert!(state.application_id.is_none());
}

#[tokio::test]
async fn test_review_outcome_clears_state_without_letter() {
    // 600 + 0 + 60 = 660 with income 22,000
    let harness = Harness::new(0);
    for message in ["Ravi", "22000", "Business"] {
        harness.say("ravi", message).await;
    }

    let reply = harness.upload("ravi").await;

    assert!(reply.response.contains("under REVIEW"));
    assert!(!reply.response.contains("Sanction Letter Generated!"));
    assert!(reply.data.is_none());
    assert_eq!(harness.stage("ravi").await, None);

    let records = harness.records.applications_for("ravi");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ApplicationStatus::Review);
}

#[tokio::test]
async fn test_income_below_minimum_keeps_asking() {
    let harness = Harness::new(0);
    harness.say("sam", "Sam").await;

    let reply = harness.say("sam", "8000").await;
    assert!(reply.response.starts_with("The minimum monthly income requirement"));
    assert_eq!(harness.stage("sam").await, Some(Stage::CollectInfo));

    let reply = harness.say("sam", "Rs. 45,000").await;
    assert!(reply.response.contains("employment type"));
}

#[tokio::test]
async fn test_kyc_without_upload_waits() {
    let harness = Harness::new(0);
    for message in ["Alice", "50000", "Salaried"] {
        harness.say("alice", message).await;
    }

    let reply = harness.say("alice", "what now?").await;
    assert!(reply.response.starts_with("Please upload your PAN card or Aadhaar card image"));
    assert_eq!(harness.stage("alice").await, Some(Stage::Kyc));
}

#[tokio::test]
async fn test_extraction_outage_returns_apology_and_keeps_state() {
    let harness = Harness::with_extractor(0, Some(Arc::new(UnreachableExtractor)));
    for message in ["Alice", "50000", "Salaried"] {
        harness.say("alice", message).await;
    }
    let before = harness.conversations.get("alice").await.unwrap().unwrap();

    let reply = harness.upload("alice").await;

    assert_eq!(reply.response, GENERIC_APOLOGY);
    assert!(reply.data.is_none());
    let after = harness.conversations.get("alice").await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_users_do_not_share_state() {
    let harness = Harness::new(0);
    harness.say("a", "Alice").await;
    harness.say("b", "Bob").await;
    harness.say("a", "50000").await;

    let a = harness.conversations.get("a").await.unwrap().unwrap();
    let b = harness.conversations.get("b").await.unwrap().unwrap();
    assert_eq!(a.data.get::<f64>(session_keys::INCOME), Some(50_000.0));
    assert!(!b.data.contains(session_keys::INCOME));
}
