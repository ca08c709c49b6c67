//! Database models
//!
//! Records stored in `validation_results` and `validation_queue`, plus the
//! structured JSON payloads carried by a validation result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Error, Result};

/// Combined outcome of the two automated validation stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Pass,
    Fail,
    Uncertain,
}

/// Whether a human needs to look at a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    AutoPass,
    AutoFail,
    NeedsReview,
}

/// Lifecycle state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Claimed,
    Completed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Column representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }

            /// Parse the column representation
            pub fn parse(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::Internal(format!(
                        "Unknown {} value '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(FinalDecision {
    Pass => "pass",
    Fail => "fail",
    Uncertain => "uncertain",
});

text_enum!(ReviewStatus {
    AutoPass => "auto_pass",
    AutoFail => "auto_fail",
    NeedsReview => "needs_review",
});

text_enum!(QueueStatus {
    Pending => "pending",
    Claimed => "claimed",
    Completed => "completed",
});

/// Details of the deterministic Houndify check
///
/// Provider-specific keys that are not modelled here survive in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoundifyResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_kind_expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_kind_actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    /// Response-content patterns that matched
    #[serde(default)]
    pub matched_patterns: Vec<String>,
    /// Response-content patterns that were expected but missing
    #[serde(default)]
    pub failed_patterns: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Consensus reported by the LLM ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleConsensus {
    Pass,
    Fail,
    Split,
    /// No judge produced a usable vote
    Unavailable,
}

/// One judge's vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVote {
    pub model: String,
    pub passed: bool,
    /// Judge's self-reported confidence, 0.0..=1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Details of the LLM ensemble stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub consensus: EnsembleConsensus,
    #[serde(default)]
    pub votes: Vec<ModelVote>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnsembleResult {
    /// Share of votes that passed, `None` without votes
    pub fn pass_ratio(&self) -> Option<f64> {
        if self.votes.is_empty() {
            return None;
        }
        let passed = self.votes.iter().filter(|v| v.passed).count();
        Some(passed as f64 / self.votes.len() as f64)
    }

    /// Mean of the confidences the judges reported
    pub fn mean_confidence(&self) -> Option<f64> {
        let confidences: Vec<f64> = self
            .votes
            .iter()
            .filter_map(|v| v.confidence)
            .filter(|c| c.is_finite())
            .collect();
        if confidences.is_empty() {
            return None;
        }
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    }

    /// Pass/fail verdict of the ensemble
    ///
    /// With votes, a side wins only when its share is strictly above
    /// `threshold`; otherwise there is no verdict. Without votes the reported
    /// consensus is used, and `split`/`unavailable` give no verdict.
    pub fn verdict(&self, threshold: f64) -> Option<bool> {
        if self.consensus == EnsembleConsensus::Unavailable {
            return None;
        }
        match self.pass_ratio() {
            Some(ratio) if ratio > threshold => Some(true),
            Some(ratio) if 1.0 - ratio > threshold => Some(false),
            Some(_) => None,
            None => match self.consensus {
                EnsembleConsensus::Pass => Some(true),
                EnsembleConsensus::Fail => Some(false),
                EnsembleConsensus::Split | EnsembleConsensus::Unavailable => None,
            },
        }
    }
}

/// Automated validation outcome for one scenario-step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub suite_run_id: Option<Uuid>,
    pub multi_turn_execution_id: Option<Uuid>,
    pub step_execution_id: Option<Uuid>,
    pub expected_outcome_id: Option<Uuid>,
    pub command_kind_match_score: Option<f64>,
    pub asr_confidence_score: Option<f64>,
    pub houndify_passed: Option<bool>,
    pub houndify_result: Option<HoundifyResult>,
    pub llm_passed: Option<bool>,
    pub ensemble_result: Option<EnsembleResult>,
    pub final_decision: FinalDecision,
    pub review_status: ReviewStatus,
    pub language_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Human review task wrapping a validation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationQueueEntry {
    pub id: Uuid,
    pub validation_result_id: Uuid,
    /// 1 (most urgent) ..= 10
    pub priority: u8,
    /// AI confidence in percent, 0.00..=100.00
    pub confidence_score: Option<f64>,
    pub language_code: Option<String>,
    pub requires_native_speaker: bool,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Insertion sequence, final ordering tie-breaker
    #[serde(skip)]
    pub seq: i64,
}
