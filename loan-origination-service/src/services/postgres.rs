use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};
use std::collections::BTreeMap;
use tracing::info;

use super::records::{
    ApplicationUpdate, AuditEntry, KycDocumentRecord, LoanApplicationRecord, RecordStore,
    RecordStoreError, UserProfile,
};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS loan_applications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        income DOUBLE PRECISION NOT NULL,
        employment_type TEXT NOT NULL,
        credit_score INTEGER,
        loan_amount DOUBLE PRECISION,
        interest_rate DOUBLE PRECISION,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS audit_logs (
        id BIGSERIAL PRIMARY KEY,
        user_id TEXT NOT NULL,
        action TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        details JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS kyc_documents (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        document_type TEXT NOT NULL,
        file_name TEXT NOT NULL,
        extracted_data JSONB NOT NULL DEFAULT '{}'::jsonb,
        validation_status TEXT NOT NULL,
        confidence TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS kyc_documents_user_idx ON kyc_documents (user_id, created_at DESC)",
];

const APPLICATION_COLUMNS: &str =
    "id, user_id, income, employment_type, credit_score, loan_amount, interest_rate, status";

const KYC_DOCUMENT_COLUMNS: &str = "id, user_id, document_type, file_name, extracted_data, \
     validation_status, confidence, created_at";

/// PostgreSQL-backed RecordStore
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub async fn connect(database_url: &str) -> Result<Self, RecordStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Connected to PostgreSQL record store");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), RecordStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn application_from_row(row: &PgRow) -> Result<LoanApplicationRecord, RecordStoreError> {
    let credit_score: Option<i32> = row.try_get("credit_score")?;
    let status: String = row.try_get("status")?;

    Ok(LoanApplicationRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        income: row.try_get("income")?,
        employment_type: row.try_get("employment_type")?,
        credit_score: credit_score.map(|s| s.max(0) as u32),
        loan_amount: row.try_get("loan_amount")?,
        interest_rate: row.try_get("interest_rate")?,
        status: status.parse()?,
    })
}

/// Enum columns hold the same text the enum serializes to
fn text_column<T: DeserializeOwned>(row: &PgRow, column: &str) -> Result<T, RecordStoreError> {
    let text: String = row.try_get(column)?;
    serde_json::from_value(Value::String(text))
        .map_err(|e| RecordStoreError::Corrupted(format!("{column}: {e}")))
}

fn kyc_document_from_row(row: &PgRow) -> Result<KycDocumentRecord, RecordStoreError> {
    let extracted_data: Json<BTreeMap<String, String>> = row.try_get("extracted_data")?;
    let validation_status: String = row.try_get("validation_status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(KycDocumentRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        document_type: text_column(row, "document_type")?,
        file_name: row.try_get("file_name")?,
        extracted_data: extracted_data.0,
        validation_status: validation_status.parse()?,
        confidence: text_column(row, "confidence")?,
        created_at,
    })
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, RecordStoreError> {
        let row = sqlx::query("SELECT id, name, email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<UserProfile, RecordStoreError> {
            Ok(UserProfile {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
            })
        })
        .transpose()
    }

    async fn create_application(
        &self,
        record: LoanApplicationRecord,
    ) -> Result<LoanApplicationRecord, RecordStoreError> {
        let query = format!(
            "INSERT INTO loan_applications (id, user_id, income, employment_type, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {APPLICATION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(record.income)
            .bind(&record.employment_type)
            .bind(record.status.as_str())
            .fetch_one(&self.pool)
            .await?;

        application_from_row(&row)
    }

    async fn update_application(
        &self,
        id: &str,
        update: ApplicationUpdate,
    ) -> Result<LoanApplicationRecord, RecordStoreError> {
        let query = format!(
            "UPDATE loan_applications \
             SET credit_score = $2, loan_amount = $3, interest_rate = $4, status = $5, \
             updated_at = NOW() WHERE id = $1 RETURNING {APPLICATION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(update.credit_score as i32)
            .bind(update.loan_amount)
            .bind(update.interest_rate)
            .bind(update.status.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RecordStoreError::NotFound {
                entity: "loan application",
                id: id.to_string(),
            })?;

        application_from_row(&row)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), RecordStoreError> {
        sqlx::query(
            "INSERT INTO audit_logs (user_id, action, agent_name, details) VALUES ($1, $2, $3, $4)",
        )
        .bind(&entry.user_id)
        .bind(&entry.action)
        .bind(&entry.agent_name)
        .bind(&entry.details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_kyc_document(
        &self,
        document: KycDocumentRecord,
    ) -> Result<KycDocumentRecord, RecordStoreError> {
        let query = format!(
            "INSERT INTO kyc_documents ({KYC_DOCUMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {KYC_DOCUMENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&document.id)
            .bind(&document.user_id)
            .bind(document.document_type.to_string())
            .bind(&document.file_name)
            .bind(Json(&document.extracted_data))
            .bind(document.validation_status.as_str())
            .bind(document.confidence.as_str())
            .bind(document.created_at)
            .fetch_one(&self.pool)
            .await?;

        kyc_document_from_row(&row)
    }

    async fn list_kyc_documents(
        &self,
        user_id: &str,
    ) -> Result<Vec<KycDocumentRecord>, RecordStoreError> {
        let query = format!(
            "SELECT {KYC_DOCUMENT_COLUMNS} FROM kyc_documents \
             WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(kyc_document_from_row).collect()
    }
}
