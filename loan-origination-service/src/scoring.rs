//! Heuristic credit scoring and loan eligibility.
//!
//! There is no bureau behind this: the score is built from an income band, an
//! employment bonus and a small random jitter that simulates bureau variance.
//! The jitter source is injectable so tests can pin it.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::services::records::ApplicationStatus;

pub const BASE_SCORE: i32 = 600;
pub const MIN_SCORE: i32 = 300;
pub const MAX_SCORE: i32 = 850;
/// Jitter is drawn from `[-JITTER_SPAN, JITTER_SPAN]`
pub const JITTER_SPAN: i32 = 20;

/// Source of the per-score random adjustment
pub trait JitterSource: Send + Sync {
    fn jitter(&self) -> i32;
}

/// Uniform jitter from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self) -> i32 {
        rand::rng().random_range(-JITTER_SPAN..=JITTER_SPAN)
    }
}

/// Always returns the same adjustment
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub i32);

impl JitterSource for FixedJitter {
    fn jitter(&self) -> i32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EligibilityAssessment {
    pub max_loan_amount: f64,
    pub interest_rate: f64,
    pub tenure_months: u32,
    pub risk_level: RiskLevel,
}

#[derive(Clone)]
pub struct CreditScorer {
    jitter: Arc<dyn JitterSource>,
}

impl CreditScorer {
    pub fn new(jitter: Arc<dyn JitterSource>) -> Self {
        Self { jitter }
    }

    pub fn with_random_jitter() -> Self {
        Self::new(Arc::new(RandomJitter))
    }

    pub fn with_fixed_jitter(jitter: i32) -> Self {
        Self::new(Arc::new(FixedJitter(jitter)))
    }

    /// Score in `[MIN_SCORE, MAX_SCORE]` for a monthly income and employment type
    pub fn credit_score(&self, income: f64, employment_type: &str) -> u32 {
        let jitter = self.jitter.jitter().clamp(-JITTER_SPAN, JITTER_SPAN);
        let score = BASE_SCORE + income_bonus(income) + employment_bonus(employment_type) + jitter;
        score.clamp(MIN_SCORE, MAX_SCORE) as u32
    }
}

impl Default for CreditScorer {
    fn default() -> Self {
        Self::with_random_jitter()
    }
}

pub fn income_bonus(income: f64) -> i32 {
    if income >= 100_000.0 {
        150
    } else if income >= 50_000.0 {
        100
    } else if income >= 30_000.0 {
        50
    } else {
        0
    }
}

/// Case-insensitive lookup; unrecognised values still earn a small bonus
pub fn employment_bonus(employment_type: &str) -> i32 {
    match employment_type.trim().to_lowercase().as_str() {
        "salaried" => 80,
        "self-employed" => 50,
        "business" => 60,
        "professional" => 70,
        "other" => 20,
        _ => 30,
    }
}

pub fn eligibility(income: f64, credit_score: u32) -> EligibilityAssessment {
    let max_loan_amount = (income * 12.0 * 100.0).round() / 100.0;

    let interest_rate = match credit_score {
        s if s >= 750 => 10.5,
        s if s >= 700 => 12.0,
        s if s >= 650 => 14.5,
        _ => 16.0,
    };

    let tenure_months = if max_loan_amount >= 500_000.0 {
        60
    } else if max_loan_amount >= 200_000.0 {
        48
    } else {
        36
    };

    EligibilityAssessment {
        max_loan_amount,
        interest_rate,
        tenure_months,
        risk_level: assess_risk(credit_score, income),
    }
}

pub fn assess_risk(credit_score: u32, income: f64) -> RiskLevel {
    if credit_score >= 750 && income >= 50_000.0 {
        RiskLevel::Low
    } else if credit_score >= 650 && income >= 30_000.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Underwriting policy; the first matching rule wins
pub fn decide(income: f64, credit_score: u32) -> ApplicationStatus {
    if income >= 30_000.0 && credit_score >= 700 {
        ApplicationStatus::Approved
    } else if income >= 20_000.0 && credit_score >= 650 {
        ApplicationStatus::Review
    } else {
        ApplicationStatus::Rejected
    }
}
