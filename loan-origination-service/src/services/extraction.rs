use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_OCR_SPACE_URL: &str = "https://api.ocr.space/parse/image";

/// Text returned by the simulated extractor: a PAN card as read by OCR
pub const SIMULATED_PAN_TEXT: &str =
    "PAN CARD\nIncome Tax Department\nPermanent Account Number\nABCDE1234F\nName: John Doe";

static PAN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{5}[0-9]{4}[A-Z]\b").expect("valid PAN regex"));
static AADHAAR_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}\s?\d{4}\s?\d{4}\b").expect("valid Aadhaar regex"));
static NAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^\s*name\s*[:\-]\s*(.+?)\s*$").expect("valid name regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentType {
    Pan,
    Aadhaar,
    Unknown,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentType::Pan => "PAN",
            DocumentType::Aadhaar => "AADHAAR",
            DocumentType::Unknown => "UNKNOWN",
        })
    }
}

impl FromStr for DocumentType {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pan" | "pan_card" => Ok(DocumentType::Pan),
            "aadhaar" | "aadhaar_card" => Ok(DocumentType::Aadhaar),
            other => Err(ExtractionError::UnsupportedDocument(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub success: bool,
    pub document_type: DocumentType,
    pub extracted_fields: BTreeMap<String, String>,
    pub raw_text: String,
    pub confidence: Confidence,
    pub error: Option<String>,
}

impl Extraction {
    /// Successful extraction, with identity fields parsed from the raw text
    pub fn from_text(document_type: DocumentType, raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let extracted_fields = extract_identity_fields(&raw_text);
        let confidence = if extracted_fields.contains_key("pan_number")
            || extracted_fields.contains_key("aadhaar_number")
        {
            Confidence::High
        } else if raw_text.chars().count() > 20 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Self {
            success: true,
            document_type,
            extracted_fields,
            raw_text,
            confidence,
            error: None,
        }
    }

    /// The provider processed the request but could not read the document
    pub fn failed(document_type: DocumentType, error: impl Into<String>) -> Self {
        Self {
            success: false,
            document_type,
            extracted_fields: BTreeMap::new(),
            raw_text: String::new(),
            confidence: Confidence::Low,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub document_type: DocumentType,
    pub message: String,
    pub extracted_fields: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("OCR request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected OCR response: {0}")]
    InvalidResponse(String),

    #[error("No document image supplied")]
    EmptyImage,

    #[error("Unsupported document type: {0}")]
    UnsupportedDocument(String),
}

/// Reads identity documents and judges whether they are acceptable for KYC
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(
        &self,
        image: &[u8],
        document_type: DocumentType,
    ) -> Result<Extraction, ExtractionError>;

    fn validate(&self, extraction: &Extraction, document_type: DocumentType) -> Validation {
        validate_identity_document(extraction, document_type)
    }
}

/// Keyword heuristic shared by every extractor
pub fn validate_identity_document(
    extraction: &Extraction,
    document_type: DocumentType,
) -> Validation {
    let accept = |document_type: DocumentType, message: &str| Validation {
        valid: true,
        document_type,
        message: message.to_string(),
        extracted_fields: extraction.extracted_fields.clone(),
    };

    if !extraction.success {
        return Validation {
            valid: false,
            document_type,
            message: extraction
                .error
                .clone()
                .unwrap_or_else(|| "Extraction failed".to_string()),
            extracted_fields: BTreeMap::new(),
        };
    }

    let upper = extraction.raw_text.to_uppercase();
    let length = extraction.raw_text.chars().count();

    match document_type {
        DocumentType::Pan if upper.contains("PAN") || length > 20 => {
            return accept(DocumentType::Pan, "PAN card verified successfully");
        }
        DocumentType::Aadhaar if upper.contains("AADHAAR") || upper.contains("GOVERNMENT") => {
            return accept(DocumentType::Aadhaar, "Aadhaar card verified successfully");
        }
        _ => {}
    }

    if length > 10 {
        return accept(
            DocumentType::Unknown,
            "Document uploaded successfully. Manual verification may be required.",
        );
    }

    Validation {
        valid: false,
        document_type,
        message: "Could not verify document. Please ensure the image is clear and readable."
            .to_string(),
        extracted_fields: BTreeMap::new(),
    }
}

/// Pull document number and holder name out of OCR text
pub fn extract_identity_fields(raw_text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();

    if let Some(m) = PAN_NUMBER.find(raw_text) {
        fields.insert("pan_number".to_string(), m.as_str().to_string());
    }
    if let Some(m) = AADHAAR_NUMBER.find(raw_text) {
        let digits: String = m.as_str().chars().filter(char::is_ascii_digit).collect();
        fields.insert("aadhaar_number".to_string(), digits);
    }
    if let Some(name) = NAME_LINE.captures(raw_text).and_then(|c| c.get(1)) {
        fields.insert("name".to_string(), name.as_str().to_string());
    }

    fields
}

/// Stand-in used when no OCR provider is configured: every upload reads as the same PAN card
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedExtractor;

#[async_trait]
impl DocumentExtractor for SimulatedExtractor {
    async fn extract(
        &self,
        _image: &[u8],
        document_type: DocumentType,
    ) -> Result<Extraction, ExtractionError> {
        Ok(Extraction::from_text(document_type, SIMULATED_PAN_TEXT))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceResponse {
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: Option<Value>,
    #[serde(default)]
    parsed_results: Vec<OcrSpaceParsedResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceParsedResult {
    #[serde(default)]
    parsed_text: String,
}

/// OCR.space `parse/image` adapter
pub struct OcrSpaceExtractor {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OcrSpaceExtractor {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DocumentExtractor for OcrSpaceExtractor {
    async fn extract(
        &self,
        image: &[u8],
        document_type: DocumentType,
    ) -> Result<Extraction, ExtractionError> {
        if image.is_empty() {
            return Err(ExtractionError::EmptyImage);
        }

        let data_uri = format!("data:{};base64,{}", sniff_mime(image), STANDARD.encode(image));
        info!(
            document_type = %document_type,
            image_bytes = image.len(),
            "Sending document to OCR.space"
        );

        let response: OcrSpaceResponse = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("apikey", self.api_key.as_str()),
                ("language", "eng"),
                ("isOverlayRequired", "false"),
                ("base64Image", data_uri.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.is_errored_on_processing {
            let message = response
                .error_message
                .as_ref()
                .and_then(first_error_message)
                .unwrap_or_else(|| "Unknown error".to_string());
            warn!(error = %message, "OCR.space could not process the document");
            return Ok(Extraction::failed(document_type, message));
        }

        let text = response
            .parsed_results
            .into_iter()
            .next()
            .map(|r| r.parsed_text)
            .ok_or_else(|| ExtractionError::InvalidResponse("no parsed results".to_string()))?;

        Ok(Extraction::from_text(document_type, text))
    }
}

/// OCR.space reports errors either as a string or a list of strings
fn first_error_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

fn sniff_mime(image: &[u8]) -> &'static str {
    if image.starts_with(b"\x89PNG") {
        "image/png"
    } else if image.starts_with(b"%PDF") {
        "application/pdf"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_fields_from_pan_text() {
        let fields = extract_identity_fields(SIMULATED_PAN_TEXT);
        assert_eq!(fields.get("pan_number").map(String::as_str), Some("ABCDE1234F"));
        assert_eq!(fields.get("name").map(String::as_str), Some("John Doe"));
        assert!(!fields.contains_key("aadhaar_number"));
    }

    #[test]
    fn test_aadhaar_number_is_normalised() {
        let fields = extract_identity_fields("Government of India\n1234 5678 9012");
        assert_eq!(fields.get("aadhaar_number").map(String::as_str), Some("123456789012"));
    }

    #[tokio::test]
    async fn test_simulated_extractor_validates_as_pan() {
        let extractor = SimulatedExtractor;
        let extraction = extractor.extract(&[], DocumentType::Pan).await.unwrap();
        assert_eq!(extraction.confidence, Confidence::High);

        let validation = extractor.validate(&extraction, DocumentType::Pan);
        assert!(validation.valid);
        assert_eq!(validation.document_type, DocumentType::Pan);
        assert_eq!(validation.message, "PAN card verified successfully");
    }

    #[test]
    fn test_unreadable_document_is_rejected() {
        let extraction = Extraction::from_text(DocumentType::Pan, "blurry");
        let validation = validate_identity_document(&extraction, DocumentType::Pan);
        assert!(!validation.valid);
        assert!(validation.message.starts_with("Could not verify document"));
    }

    #[test]
    fn test_text_length_counts_characters() {
        // 9 characters, 25 bytes
        let extraction = Extraction::from_text(DocumentType::Pan, "पैन कार्ड");
        assert_eq!(extraction.confidence, Confidence::Low);

        let validation = validate_identity_document(&extraction, DocumentType::Pan);
        assert!(!validation.valid);
    }

    #[test]
    fn test_other_readable_text_needs_manual_review() {
        let extraction = Extraction::from_text(DocumentType::Aadhaar, "Driving Licence 42");
        let validation = validate_identity_document(&extraction, DocumentType::Aadhaar);
        assert!(validation.valid);
        assert_eq!(validation.document_type, DocumentType::Unknown);
    }

    #[test]
    fn test_failed_extraction_surfaces_provider_error() {
        let extraction = Extraction::failed(DocumentType::Pan, "Image too small");
        let validation = validate_identity_document(&extraction, DocumentType::Pan);
        assert!(!validation.valid);
        assert_eq!(validation.message, "Image too small");
    }

    mod ocr_space {
        use super::*;
        use serde_json::json;
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        async fn extractor_for(server: &MockServer) -> OcrSpaceExtractor {
            OcrSpaceExtractor::new(
                "test-key",
                format!("{}/parse/image", server.uri()),
                Duration::from_secs(5),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn test_parsed_text_is_extracted() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/parse/image"))
                .and(body_string_contains("apikey=test-key"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "IsErroredOnProcessing": false,
                    "ParsedResults": [{ "ParsedText": SIMULATED_PAN_TEXT }]
                })))
                .expect(1)
                .mount(&server)
                .await;

            let extraction = extractor_for(&server)
                .await
                .extract(b"\x89PNG....", DocumentType::Pan)
                .await
                .unwrap();

            assert!(extraction.success);
            assert_eq!(extraction.raw_text, SIMULATED_PAN_TEXT);
            assert_eq!(
                extraction.extracted_fields.get("pan_number").map(String::as_str),
                Some("ABCDE1234F")
            );
        }

        #[tokio::test]
        async fn test_provider_error_is_an_unsuccessful_extraction() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "IsErroredOnProcessing": true,
                    "ErrorMessage": ["Unable to recognize the file type"]
                })))
                .mount(&server)
                .await;

            let extractor = extractor_for(&server).await;
            let extraction = extractor.extract(b"jpeg", DocumentType::Pan).await.unwrap();

            assert!(!extraction.success);
            let validation = extractor.validate(&extraction, DocumentType::Pan);
            assert!(!validation.valid);
            assert_eq!(validation.message, "Unable to recognize the file type");
        }

        #[tokio::test]
        async fn test_http_failure_is_an_error() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            let err = extractor_for(&server)
                .await
                .extract(b"jpeg", DocumentType::Pan)
                .await
                .unwrap_err();
            assert!(matches!(err, ExtractionError::Request(_)));
        }

        #[tokio::test]
        async fn test_empty_image_is_not_sent() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200))
                .expect(0)
                .mount(&server)
                .await;

            let err = extractor_for(&server)
                .await
                .extract(&[], DocumentType::Pan)
                .await
                .unwrap_err();
            assert!(matches!(err, ExtractionError::EmptyImage));
        }
    }

    #[test]
    fn test_document_type_parsing() {
        assert_eq!("pan_card".parse::<DocumentType>().unwrap(), DocumentType::Pan);
        assert_eq!("Aadhaar".parse::<DocumentType>().unwrap(), DocumentType::Aadhaar);
        assert!("itr".parse::<DocumentType>().is_err());
    }
}
