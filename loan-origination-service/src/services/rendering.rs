use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::tasks::utils::{format_amount, format_rate};

pub const DOWNLOAD_ROUTE: &str = "/api/download-sanction";

/// Fields printed on a sanction letter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanctionLetter {
    pub applicant_name: String,
    pub loan_amount: f64,
    pub interest_rate: f64,
    pub tenure_months: u32,
    pub credit_score: u32,
    pub issued_at: DateTime<Utc>,
}

/// A rendered artifact, retrievable later by its name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Invalid artifact name: {0}")]
    InvalidName(String),
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(
        &self,
        name: &str,
        letter: &SanctionLetter,
    ) -> Result<ArtifactHandle, RenderError>;

    /// Bytes of a previously rendered artifact; `None` when there is no such artifact
    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, RenderError>;
}

/// `sanction_letter_{user}_{YYYYmmdd_HHMMSS}_{random}.pdf`
///
/// The random suffix keeps names unguessable from the user id and issue time.
pub fn artifact_name(user_id: &str, now: DateTime<Utc>) -> String {
    let user: String = user_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!(
        "sanction_letter_{}_{}_{:016x}.pdf",
        user,
        now.format("%Y%m%d_%H%M%S"),
        rand::random::<u64>()
    )
}

pub fn download_url(name: &str) -> String {
    format!("{DOWNLOAD_ROUTE}/{name}")
}

pub fn is_safe_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Text of the letter, one entry per printed line; the first line is the title
pub fn letter_lines(letter: &SanctionLetter) -> Vec<String> {
    let years = letter.tenure_months / 12;
    vec![
        "LOAN SANCTION LETTER".to_string(),
        String::new(),
        format!("Date: {}", letter.issued_at.format("%B %d, %Y")),
        format!("Reference: LOAN/{}/AUTO", letter.issued_at.format("%Y%m%d")),
        String::new(),
        format!("Dear {},", letter.applicant_name),
        String::new(),
        "We are pleased to inform you that your personal loan application has been APPROVED."
            .to_string(),
        "After careful evaluation of your application and credit profile, we are happy to"
            .to_string(),
        "offer you the following loan terms:".to_string(),
        String::new(),
        format!("Sanctioned Amount:   Rs. {}", format_amount(letter.loan_amount)),
        format!("Interest Rate:       {}% per annum", format_rate(letter.interest_rate)),
        format!("Loan Tenure:         {} months ({} years)", letter.tenure_months, years),
        format!("Credit Score:        {}", letter.credit_score),
        "Processing Fee:      Rs. 1,000 + GST".to_string(),
        "Disbursement:        Within 48 hours of documentation".to_string(),
        String::new(),
        "Terms and Conditions:".to_string(),
        "1. This sanction is valid for 30 days from the date of this letter.".to_string(),
        "2. Disbursement is subject to completion of final documentation.".to_string(),
        "3. EMI will be debited from your registered bank account each month.".to_string(),
        "4. Prepayment is allowed after 6 EMIs without any charges.".to_string(),
        String::new(),
        "Congratulations, and thank you for choosing us.".to_string(),
    ]
}

/// WinAnsi bytes for a line of text; characters outside Latin-1 print as '?'
fn win_ansi(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| match u8::try_from(u32::from(c)) {
            Ok(byte) if !c.is_control() => byte,
            _ => b'?',
        })
        .collect()
}

fn font(base_font: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Single-page A4 PDF with the title in bold and the rest in Helvetica
pub fn build_pdf(lines: &[String]) -> Result<Vec<u8>, RenderError> {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Td", vec![72.into(), 780.into()]),
    ];
    let mut lines = lines.iter();
    if let Some(title) = lines.next() {
        operations.push(Operation::new("Tf", vec!["F2".into(), 18.into()]));
        operations.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(title))]));
        operations.push(Operation::new("Td", vec![0.into(), (-30).into()]));
    }
    operations.push(Operation::new("Tf", vec!["F1".into(), 11.into()]));
    operations.push(Operation::new("TL", vec![15.into()]));
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(line))]));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));

    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(font("Helvetica"));
    let bold_id = doc.add_object(font("Helvetica-Bold"));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });
    let content = Content { operations }.encode()?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

/// Writes sanction letters as PDF files into one directory
#[derive(Debug, Clone)]
pub struct PdfLetterRenderer {
    dir: PathBuf,
}

impl PdfLetterRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DocumentRenderer for PdfLetterRenderer {
    async fn render(
        &self,
        name: &str,
        letter: &SanctionLetter,
    ) -> Result<ArtifactHandle, RenderError> {
        if !is_safe_artifact_name(name) {
            return Err(RenderError::InvalidName(name.to_string()));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = build_pdf(&letter_lines(letter))?;
        tokio::fs::write(self.dir.join(name), &bytes).await?;

        info!(artifact = %name, bytes = bytes.len(), "Sanction letter rendered");
        Ok(ArtifactHandle {
            name: name.to_string(),
            url: download_url(name),
        })
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, RenderError> {
        if !is_safe_artifact_name(name) {
            debug!(artifact = %name, "Rejecting unsafe artifact name");
            return Ok(None);
        }

        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
