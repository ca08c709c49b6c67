//! Decision combination
//!
//! Turns the deterministic Houndify signal and the LLM ensemble signal into a
//! final decision and review status. Everything here is pure: no storage, no
//! queue admission. Thresholds only shape how a signal is derived from raw
//! scores; [`combine`] itself has no tunables.

use serde::{Deserialize, Serialize};
use vqa_common::db::{EnsembleResult, FinalDecision, ReviewStatus};

/// Output of [`combine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub final_decision: FinalDecision,
    pub review_status: ReviewStatus,
}

/// Combine the two stage signals
///
/// Agreement auto-decides. Disagreement, or any missing signal, goes to a
/// human.
pub fn combine(houndify_passed: Option<bool>, llm_passed: Option<bool>) -> Decision {
    let (final_decision, review_status) = match (houndify_passed, llm_passed) {
        (Some(true), Some(true)) => (FinalDecision::Pass, ReviewStatus::AutoPass),
        (Some(false), Some(false)) => (FinalDecision::Fail, ReviewStatus::AutoFail),
        _ => (FinalDecision::Uncertain, ReviewStatus::NeedsReview),
    };

    Decision {
        final_decision,
        review_status,
    }
}

/// Thresholds for deriving a stage signal when the producer did not state one
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Minimum ASR confidence (0.0..=1.0) for the Houndify check to pass
    pub min_asr_confidence: f64,
    /// Whether the recognised command kind must match the expected one
    pub require_command_kind_match: bool,
    /// Share of ensemble votes a side needs to strictly exceed (0.5..1.0)
    pub ensemble_pass_ratio: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            min_asr_confidence: 0.70,
            require_command_kind_match: true,
            ensemble_pass_ratio: 0.5,
        }
    }
}

impl DecisionThresholds {
    /// Reject thresholds outside their meaningful ranges
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_asr_confidence) {
            return Err(format!(
                "min_asr_confidence must be within 0.0..=1.0, got {}",
                self.min_asr_confidence
            ));
        }
        if !(0.5..1.0).contains(&self.ensemble_pass_ratio) {
            return Err(format!(
                "ensemble_pass_ratio must be within 0.5..1.0, got {}",
                self.ensemble_pass_ratio
            ));
        }
        Ok(())
    }

    /// Houndify signal: the explicit flag, else derived from the scores
    ///
    /// A score the thresholds depend on being absent yields `None`.
    pub fn houndify_signal(
        &self,
        explicit: Option<bool>,
        command_kind_match_score: Option<f64>,
        asr_confidence_score: Option<f64>,
    ) -> Option<bool> {
        if explicit.is_some() {
            return explicit;
        }

        let asr = asr_confidence_score.filter(|s| s.is_finite())?;
        let asr_ok = asr >= self.min_asr_confidence;

        if self.require_command_kind_match {
            let kind = command_kind_match_score.filter(|s| s.is_finite())?;
            Some(kind >= 1.0 && asr_ok)
        } else {
            Some(asr_ok)
        }
    }

    /// LLM signal: the explicit flag, else the ensemble verdict
    pub fn llm_signal(
        &self,
        explicit: Option<bool>,
        ensemble: Option<&EnsembleResult>,
    ) -> Option<bool> {
        if explicit.is_some() {
            return explicit;
        }
        ensemble.and_then(|e| e.verdict(self.ensemble_pass_ratio))
    }
}
