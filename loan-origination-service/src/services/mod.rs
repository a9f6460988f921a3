// External collaborators consumed by the stage tasks
pub mod extraction;
pub mod postgres;
pub mod records;
pub mod rendering;

use std::sync::Arc;

use crate::scoring::CreditScorer;

pub use extraction::{DocumentExtractor, DocumentType, OcrSpaceExtractor, SimulatedExtractor};
pub use postgres::PostgresRecordStore;
pub use records::{InMemoryRecordStore, RecordStore};
pub use rendering::{DocumentRenderer, PdfLetterRenderer};

/// Everything the stage tasks call out to, shared across the service
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn DocumentExtractor>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub records: Arc<dyn RecordStore>,
    pub scorer: Arc<CreditScorer>,
}

impl Collaborators {
    /// In-memory records and the simulated extractor, letters written to `letter_dir`
    pub fn in_memory(letter_dir: impl Into<std::path::PathBuf>, scorer: CreditScorer) -> Self {
        Self {
            extractor: Arc::new(SimulatedExtractor),
            renderer: Arc::new(PdfLetterRenderer::new(letter_dir)),
            records: Arc::new(InMemoryRecordStore::new()),
            scorer: Arc::new(scorer),
        }
    }
}
