use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::extraction::{Confidence, DocumentType, Extraction, Validation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Review,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::Approved => "APPROVED",
            ApplicationStatus::Review => "REVIEW",
            ApplicationStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = RecordStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ApplicationStatus::Pending),
            "APPROVED" => Ok(ApplicationStatus::Approved),
            "REVIEW" => Ok(ApplicationStatus::Review),
            "REJECTED" => Ok(ApplicationStatus::Rejected),
            other => Err(RecordStoreError::Corrupted(format!(
                "unknown application status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplicationRecord {
    pub id: String,
    pub user_id: String,
    pub income: f64,
    pub employment_type: String,
    pub credit_score: Option<u32>,
    pub loan_amount: Option<f64>,
    pub interest_rate: Option<f64>,
    pub status: ApplicationStatus,
}

impl LoanApplicationRecord {
    /// New application awaiting underwriting, with a fresh random id
    pub fn pending(
        user_id: impl Into<String>,
        income: f64,
        employment_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            income,
            employment_type: employment_type.into(),
            credit_score: None,
            loan_amount: None,
            interest_rate: None,
            status: ApplicationStatus::Pending,
        }
    }
}

/// Decision fields written back once underwriting has run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApplicationUpdate {
    pub credit_score: u32,
    pub loan_amount: f64,
    pub interest_rate: f64,
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: String,
    pub action: String,
    pub agent_name: String,
    pub details: Value,
}

impl AuditEntry {
    pub fn new(
        user_id: impl Into<String>,
        action: impl Into<String>,
        agent_name: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            action: action.into(),
            agent_name: agent_name.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Verified,
    Failed,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Verified => "verified",
            ValidationStatus::Failed => "failed",
        }
    }
}

impl FromStr for ValidationStatus {
    type Err = RecordStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verified" => Ok(ValidationStatus::Verified),
            "failed" => Ok(ValidationStatus::Failed),
            other => Err(RecordStoreError::Corrupted(format!(
                "unknown validation status {other}"
            ))),
        }
    }
}

/// An identity document that went through extraction and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycDocumentRecord {
    pub id: String,
    pub user_id: String,
    pub document_type: DocumentType,
    pub file_name: String,
    pub extracted_data: BTreeMap<String, String>,
    pub validation_status: ValidationStatus,
    pub confidence: Confidence,
    pub created_at: DateTime<Utc>,
}

impl KycDocumentRecord {
    pub fn new(
        user_id: impl Into<String>,
        document_type: DocumentType,
        file_name: impl Into<String>,
        extraction: &Extraction,
        validation: &Validation,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            document_type,
            file_name: file_name.into(),
            extracted_data: extraction.extracted_fields.clone(),
            validation_status: if validation.valid {
                ValidationStatus::Verified
            } else {
                ValidationStatus::Failed
            },
            confidence: extraction.confidence,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Corrupted record: {0}")]
    Corrupted(String),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// Durable records of users, loan applications and the audit trail
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, RecordStoreError>;

    async fn create_application(
        &self,
        record: LoanApplicationRecord,
    ) -> Result<LoanApplicationRecord, RecordStoreError>;

    async fn update_application(
        &self,
        id: &str,
        update: ApplicationUpdate,
    ) -> Result<LoanApplicationRecord, RecordStoreError>;

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), RecordStoreError>;

    async fn save_kyc_document(
        &self,
        document: KycDocumentRecord,
    ) -> Result<KycDocumentRecord, RecordStoreError>;

    /// Documents of one user, newest first
    async fn list_kyc_documents(
        &self,
        user_id: &str,
    ) -> Result<Vec<KycDocumentRecord>, RecordStoreError>;
}

/// Append an audit entry, swallowing any failure
pub async fn record_audit(store: &dyn RecordStore, entry: AuditEntry) {
    let action = entry.action.clone();
    let user_id = entry.user_id.clone();
    match store.append_audit(entry).await {
        Ok(()) => debug!(user_id = %user_id, action = %action, "Audit entry recorded"),
        Err(e) => warn!(user_id = %user_id, action = %action, error = %e, "Dropping audit entry"),
    }
}

/// Store a KYC document, swallowing any failure
pub async fn record_kyc_document(store: &dyn RecordStore, document: KycDocumentRecord) {
    let user_id = document.user_id.clone();
    match store.save_kyc_document(document).await {
        Ok(saved) => debug!(user_id = %user_id, document_id = %saved.id, "KYC document stored"),
        Err(e) => warn!(user_id = %user_id, error = %e, "Dropping KYC document"),
    }
}

/// In-memory implementation of RecordStore
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    users: Arc<DashMap<String, UserProfile>>,
    applications: Arc<DashMap<String, LoanApplicationRecord>>,
    audit_log: Arc<Mutex<Vec<AuditEntry>>>,
    kyc_documents: Arc<Mutex<Vec<KycDocumentRecord>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, profile: UserProfile) {
        self.users.insert(profile.id.clone(), profile);
    }

    pub fn application(&self, id: &str) -> Option<LoanApplicationRecord> {
        self.applications.get(id).map(|entry| entry.clone())
    }

    pub fn applications_for(&self, user_id: &str) -> Vec<LoanApplicationRecord> {
        self.applications
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, RecordStoreError> {
        Ok(self.users.get(user_id).map(|entry| entry.clone()))
    }

    async fn create_application(
        &self,
        record: LoanApplicationRecord,
    ) -> Result<LoanApplicationRecord, RecordStoreError> {
        self.applications.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_application(
        &self,
        id: &str,
        update: ApplicationUpdate,
    ) -> Result<LoanApplicationRecord, RecordStoreError> {
        let mut record = self
            .applications
            .get_mut(id)
            .ok_or_else(|| RecordStoreError::NotFound {
                entity: "loan application",
                id: id.to_string(),
            })?;

        record.credit_score = Some(update.credit_score);
        record.loan_amount = Some(update.loan_amount);
        record.interest_rate = Some(update.interest_rate);
        record.status = update.status;
        Ok(record.clone())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), RecordStoreError> {
        self.audit_log
            .lock()
            .map_err(|_| RecordStoreError::Unavailable("audit log lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }

    async fn save_kyc_document(
        &self,
        document: KycDocumentRecord,
    ) -> Result<KycDocumentRecord, RecordStoreError> {
        self.kyc_documents
            .lock()
            .map_err(|_| RecordStoreError::Unavailable("document list lock poisoned".to_string()))?
            .push(document.clone());
        Ok(document)
    }

    async fn list_kyc_documents(
        &self,
        user_id: &str,
    ) -> Result<Vec<KycDocumentRecord>, RecordStoreError> {
        let documents = self
            .kyc_documents
            .lock()
            .map_err(|_| RecordStoreError::Unavailable("document list lock poisoned".to_string()))?;

        let mut listed: Vec<KycDocumentRecord> = documents
            .iter()
            .rev()
            .filter(|document| document.user_id == user_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listed)
    }
}
