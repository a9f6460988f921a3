// Loan origination stage tasks
pub mod document_issuance;
pub mod identity_verification;
pub mod profile_collection;
pub mod risk_decisioning;

// Shared modules
pub mod types;
pub mod utils;

// Re-export task implementations
pub use document_issuance::DocumentIssuanceTask;
pub use identity_verification::IdentityVerificationTask;
pub use profile_collection::ProfileCollectionTask;
pub use risk_decisioning::RiskDecisioningTask;

// Re-export session keys
pub use types::session_keys;
