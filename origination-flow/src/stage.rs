use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;

/// Phase of the loan-origination conversation.
///
/// Variants are declared in conversation order; the derived `Ord` is what the
/// orchestrator relies on to refuse auto-chains that would move backwards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Greeting,
    CollectInfo,
    Kyc,
    Underwriting,
    Sanction,
    Complete,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Greeting,
        Stage::CollectInfo,
        Stage::Kyc,
        Stage::Underwriting,
        Stage::Sanction,
        Stage::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Greeting => "greeting",
            Stage::CollectInfo => "collect_info",
            Stage::Kyc => "kyc",
            Stage::Underwriting => "underwriting",
            Stage::Sanction => "sanction",
            Stage::Complete => "complete",
        }
    }

    /// Reaching this stage ends the conversation and discards its state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| FlowError::UnknownStage(s.to_string()))
    }
}
