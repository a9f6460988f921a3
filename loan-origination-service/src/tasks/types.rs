use origination_flow::ApplicantData;

/// Keys of the applicant data accumulated across turns
pub mod session_keys {
    pub const NAME: &str = "name";
    pub const INCOME: &str = "income";
    pub const EMPLOYMENT_TYPE: &str = "employment_type";
    pub const KYC_VERIFIED: &str = "kyc_verified";
    pub const CREDIT_SCORE: &str = "credit_score";
    pub const LOAN_AMOUNT: &str = "loan_amount";
    pub const INTEREST_RATE: &str = "interest_rate";
    pub const TENURE_MONTHS: &str = "tenure_months";
    pub const STATUS: &str = "status";
}

/// Profile fields collected before KYC, in the order they are asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Income,
    EmploymentType,
}

impl ProfileField {
    pub const CHECKLIST: [ProfileField; 3] = [
        ProfileField::Name,
        ProfileField::Income,
        ProfileField::EmploymentType,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ProfileField::Name => session_keys::NAME,
            ProfileField::Income => session_keys::INCOME,
            ProfileField::EmploymentType => session_keys::EMPLOYMENT_TYPE,
        }
    }

    /// The field currently being collected, or `None` once the profile is complete
    pub fn first_missing(data: &ApplicantData) -> Option<ProfileField> {
        Self::CHECKLIST
            .into_iter()
            .find(|field| !data.contains(field.key()))
    }
}
