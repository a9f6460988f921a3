use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::services::extraction::{Confidence, Extraction, Validation};
use crate::services::records::KycDocumentRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(default, alias = "hasAttachment", alias = "has_attachment")]
    pub has_file: bool,
    /// Base64-encoded document image sent with the turn
    #[serde(default, alias = "attachmentBase64")]
    pub attachment_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ChatResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDocumentRequest {
    pub document_type: String,
    pub image_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDocumentResponse {
    pub extraction: Extraction,
    pub validation: Validation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadKycRequest {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "documentType")]
    pub document_type: String,
    #[serde(default, alias = "fileName")]
    pub file_name: Option<String>,
    #[serde(alias = "imageBase64")]
    pub image_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadKycResponse {
    pub success: bool,
    pub message: String,
    pub document_id: String,
    pub extracted_data: BTreeMap<String, String>,
    pub validation: Validation,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycDocumentsResponse {
    pub success: bool,
    pub documents: Vec<KycDocumentRecord>,
}
