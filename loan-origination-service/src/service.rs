use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use origination_flow::{ConversationStore, InMemoryConversationStore, Turn, TurnRunner};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    models::{
        ChatRequest, ChatResponse, KycDocumentsResponse, UploadKycRequest, UploadKycResponse,
        VerifyDocumentRequest, VerifyDocumentResponse,
    },
    scoring::CreditScorer,
    services::{
        Collaborators,
        extraction::{
            DocumentExtractor, DocumentType, ExtractionError, OcrSpaceExtractor,
            SimulatedExtractor,
        },
        postgres::PostgresRecordStore,
        records::{InMemoryRecordStore, KycDocumentRecord, RecordStore},
        rendering::{DocumentRenderer, PdfLetterRenderer, is_safe_artifact_name},
    },
    workflow::create_turn_runner,
};

/// File name stored when an upload does not carry one
const DEFAULT_UPLOAD_NAME: &str = "upload";

/// The only text a failed turn ever returns
pub const GENERIC_APOLOGY: &str = "I apologize, but I encountered an error. Please try again or contact support if the issue persists.";

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, filename: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "filename": filename
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub runner: TurnRunner,
    pub collaborators: Collaborators,
}

impl AppState {
    pub fn new(collaborators: Collaborators, conversations: Arc<dyn ConversationStore>) -> Self {
        let runner = create_turn_runner(&collaborators, conversations);
        Self {
            runner,
            collaborators,
        }
    }
}

pub async fn create_app(config: &Config) -> anyhow::Result<Router> {
    let app_state = create_app_state(config).await?;
    Ok(build_router(app_state))
}

pub async fn create_app_state(config: &Config) -> anyhow::Result<AppState> {
    let collaborators = Collaborators {
        extractor: create_extractor(config)?,
        renderer: Arc::new(PdfLetterRenderer::new(&config.sanction_letter_dir)),
        records: create_record_store(config).await,
        scorer: Arc::new(CreditScorer::with_random_jitter()),
    };

    Ok(AppState::new(
        collaborators,
        Arc::new(InMemoryConversationStore::new()),
    ))
}

fn create_extractor(config: &Config) -> anyhow::Result<Arc<dyn DocumentExtractor>> {
    match &config.ocr_space_api_key {
        Some(api_key) => {
            info!(endpoint = %config.ocr_space_url, "Using OCR.space document extraction");
            let extractor = OcrSpaceExtractor::new(
                api_key.clone(),
                config.ocr_space_url.clone(),
                config.external_call_timeout(),
            )?;
            Ok(Arc::new(extractor))
        }
        None => {
            info!("Using simulated document extraction (set OCR_SPACE_API_KEY to use OCR.space)");
            Ok(Arc::new(SimulatedExtractor))
        }
    }
}

async fn create_record_store(config: &Config) -> Arc<dyn RecordStore> {
    let Some(database_url) = &config.database_url else {
        info!("Using in-memory record store (set DATABASE_URL to use PostgreSQL)");
        return Arc::new(InMemoryRecordStore::new());
    };

    info!("Using PostgreSQL record store");
    match PostgresRecordStore::connect(database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory record store.",
                e
            );
            Arc::new(InMemoryRecordStore::new())
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(mut request: Request<axum::body::Body>, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/download-sanction/{filename}", get(download_sanction))
        .route("/api/verify-document", post(verify_document))
        .route("/api/upload-kyc", post(upload_kyc))
        .route("/api/kyc-documents/{user_id}", get(list_kyc_documents))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Loan Origination Service",
        "version": "1.0.0",
        "description": "Conversational personal loan origination: profile, KYC, underwriting and sanction",
        "endpoints": {
            "POST /api/chat": "Send one conversation turn",
            "GET /api/download-sanction/{filename}": "Download a generated sanction letter",
            "POST /api/verify-document": "Extract and validate an identity document",
            "POST /api/upload-kyc": "Extract, validate and store a user's KYC document",
            "GET /api/kyc-documents/{user_id}": "List a user's KYC documents, newest first",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    Json(handle_chat(&state.runner, request).await)
}

/// Run one turn; every failure becomes the generic apology
pub async fn handle_chat(runner: &TurnRunner, request: ChatRequest) -> ChatResponse {
    if request.user_id.trim().is_empty() {
        warn!("Chat turn without a user id");
        return ChatResponse::text(GENERIC_APOLOGY);
    }

    info!(
        user_id = %request.user_id,
        has_file = request.has_file,
        message_length = request.message.len(),
        "Processing chat turn"
    );

    let attachment = match request
        .attachment_base64
        .as_deref()
        .map(|b64| STANDARD.decode(b64.trim()))
    {
        None => None,
        Some(Ok(bytes)) => Some(bytes),
        Some(Err(e)) => {
            warn!(user_id = %request.user_id, error = %e, "Attachment is not valid base64");
            return ChatResponse::text(GENERIC_APOLOGY);
        }
    };

    let mut turn = Turn::new(request.user_id.clone(), request.message);
    if request.has_file || attachment.is_some() {
        turn = turn.with_attachment(attachment);
    }

    match runner.run(turn).await {
        Ok(outcome) => {
            info!(
                user_id = %request.user_id,
                stage = %outcome.stage,
                chained = outcome.chained,
                "Chat turn completed"
            );
            ChatResponse {
                response: outcome.response,
                data: outcome.payload,
            }
        }
        Err(e) => {
            error!(user_id = %request.user_id, error = %e, "Chat turn failed");
            ChatResponse::text(GENERIC_APOLOGY)
        }
    }
}

async fn download_sanction(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if !is_safe_artifact_name(&filename) {
        warn!(filename = %filename, "Rejected sanction letter download");
        return Err(not_found_error("File not found", &filename));
    }

    match state.collaborators.renderer.fetch(&filename).await {
        Ok(Some(bytes)) => Ok((
            [
                (header::CONTENT_TYPE, "application/pdf".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            bytes,
        )
            .into_response()),
        Ok(None) => Err(not_found_error("File not found", &filename)),
        Err(e) => {
            error!(filename = %filename, error = %e, "Failed to read sanction letter");
            Err(internal_error("Failed to read sanction letter", &e.to_string()))
        }
    }
}

fn parse_document_type(document_type: &str) -> Result<DocumentType, ApiError> {
    document_type
        .parse()
        .map_err(|e: ExtractionError| bad_request_error(&e.to_string()))
}

fn decode_image(image_base64: &str) -> Result<Vec<u8>, ApiError> {
    STANDARD
        .decode(image_base64.trim())
        .map_err(|_| bad_request_error("image_base64 is not valid base64"))
}

fn extraction_error(context: &str, e: ExtractionError) -> ApiError {
    if matches!(e, ExtractionError::EmptyImage) {
        return bad_request_error(&e.to_string());
    }
    error!(error = %e, "{}", context);
    internal_error(context, &e.to_string())
}

async fn verify_document(
    State(state): State<AppState>,
    Json(request): Json<VerifyDocumentRequest>,
) -> ApiResult<VerifyDocumentResponse> {
    let document_type = parse_document_type(&request.document_type)?;
    let image = decode_image(&request.image_base64)?;

    info!(document_type = %document_type, image_bytes = image.len(), "Verifying document");

    let extractor = &state.collaborators.extractor;
    let extraction = extractor
        .extract(&image, document_type)
        .await
        .map_err(|e| extraction_error("Document extraction failed", e))?;
    let validation = extractor.validate(&extraction, document_type);

    Ok(Json(VerifyDocumentResponse {
        extraction,
        validation,
    }))
}

async fn upload_kyc(
    State(state): State<AppState>,
    Json(request): Json<UploadKycRequest>,
) -> ApiResult<UploadKycResponse> {
    if request.user_id.trim().is_empty() {
        return Err(bad_request_error("user_id is required"));
    }
    let document_type = parse_document_type(&request.document_type)?;
    let image = decode_image(&request.image_base64)?;
    let file_name = request
        .file_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());

    info!(
        user_id = %request.user_id,
        document_type = %document_type,
        file_name = %file_name,
        image_bytes = image.len(),
        "Processing KYC upload"
    );

    let extractor = &state.collaborators.extractor;
    let extraction = extractor
        .extract(&image, document_type)
        .await
        .map_err(|e| extraction_error("Document processing failed", e))?;
    let validation = extractor.validate(&extraction, document_type);

    let document = KycDocumentRecord::new(
        &request.user_id,
        document_type,
        file_name,
        &extraction,
        &validation,
    );
    let saved = state
        .collaborators
        .records
        .save_kyc_document(document)
        .await
        .map_err(|e| {
            error!(user_id = %request.user_id, error = %e, "Failed to store KYC document");
            internal_error("Document processing failed", &e.to_string())
        })?;

    Ok(Json(UploadKycResponse {
        success: true,
        message: "Document processed successfully".to_string(),
        document_id: saved.id,
        extracted_data: saved.extracted_data,
        validation,
        confidence: saved.confidence,
    }))
}

async fn list_kyc_documents(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<KycDocumentsResponse> {
    let documents = state
        .collaborators
        .records
        .list_kyc_documents(&user_id)
        .await
        .map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to list KYC documents");
            internal_error("Failed to fetch documents", &e.to_string())
        })?;

    Ok(Json(KycDocumentsResponse {
        success: true,
        documents,
    }))
}
