//! Priority and language routing for queue admission
//!
//! Maps the AI confidence of a result to a queue priority (1 = most urgent)
//! and builds the filter deciding which validators may take the entry.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lowest numeric (most urgent) priority
pub const MIN_PRIORITY: u8 = 1;
/// Highest numeric (least urgent) priority
pub const MAX_PRIORITY: u8 = 10;
/// Priority used when confidence is unknown
pub const DEFAULT_PRIORITY: u8 = 5;

/// Display grouping of numeric priorities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    High,
    Normal,
    Low,
}

impl PriorityBand {
    /// `<= 3` high, `4..=6` normal, `>= 7` low
    pub fn from_priority(priority: u8) -> Self {
        match priority {
            0..=3 => PriorityBand::High,
            4..=6 => PriorityBand::Normal,
            _ => PriorityBand::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityBand::High => "high",
            PriorityBand::Normal => "normal",
            PriorityBand::Low => "low",
        }
    }
}

impl std::fmt::Display for PriorityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of the confidence → priority function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityStep {
    /// Applies to confidence strictly below this value
    pub below: f64,
    pub priority: u8,
}

/// Monotonic step function from confidence (0..=100) to priority (1..=10)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityPolicy {
    steps: Vec<PriorityStep>,
    ceiling: u8,
    default_priority: u8,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        let steps = [(20.0, 1), (40.0, 2), (50.0, 3), (60.0, 4), (70.0, 5), (80.0, 6), (90.0, 7)]
            .into_iter()
            .map(|(below, priority)| PriorityStep { below, priority })
            .collect();

        Self {
            steps,
            ceiling: 8,
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl PriorityPolicy {
    /// Build a policy, checking range and monotonicity
    ///
    /// `ceiling` applies to confidence at or above the last step bound.
    pub fn new(steps: Vec<PriorityStep>, ceiling: u8, default_priority: u8) -> Result<Self, String> {
        let in_range = |p: u8| (MIN_PRIORITY..=MAX_PRIORITY).contains(&p);

        if !in_range(ceiling) {
            return Err(format!("ceiling priority {} outside 1..=10", ceiling));
        }
        if !in_range(default_priority) {
            return Err(format!("default priority {} outside 1..=10", default_priority));
        }

        let mut previous: Option<PriorityStep> = None;
        for step in &steps {
            if !step.below.is_finite() {
                return Err(format!("step bound {} is not finite", step.below));
            }
            if !in_range(step.priority) {
                return Err(format!("step priority {} outside 1..=10", step.priority));
            }
            if let Some(prev) = previous {
                if step.below <= prev.below {
                    return Err(format!(
                        "step bounds must increase: {} after {}",
                        step.below, prev.below
                    ));
                }
                if step.priority < prev.priority {
                    return Err(format!(
                        "step priorities must not decrease: {} after {}",
                        step.priority, prev.priority
                    ));
                }
            }
            previous = Some(*step);
        }

        if let Some(last) = previous {
            if ceiling < last.priority {
                return Err(format!(
                    "ceiling priority {} is more urgent than last step {}",
                    ceiling, last.priority
                ));
            }
        }

        Ok(Self {
            steps,
            ceiling,
            default_priority,
        })
    }

    /// Priority for an AI confidence percentage
    ///
    /// Lower confidence never yields a less urgent priority than higher
    /// confidence. Out-of-range input is clamped; absent or NaN input gets the
    /// default priority.
    pub fn priority_for(&self, confidence_score: Option<f64>) -> u8 {
        let confidence = match confidence_score {
            Some(c) if !c.is_nan() => c.clamp(0.0, 100.0),
            _ => return self.default_priority,
        };

        self.steps
            .iter()
            .find(|step| confidence < step.below)
            .map(|step| step.priority)
            .unwrap_or(self.ceiling)
    }

    pub fn steps(&self) -> &[PriorityStep] {
        &self.steps
    }

    pub fn ceiling(&self) -> u8 {
        self.ceiling
    }

    pub fn default_priority(&self) -> u8 {
        self.default_priority
    }
}

/// Parse `"20:1,40:2,50:3"` into steps
pub fn parse_priority_steps(s: &str) -> Result<Vec<PriorityStep>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (below, priority) = part
                .split_once(':')
                .ok_or_else(|| format!("step '{}' is not bound:priority", part))?;
            let below = f64::from_str(below.trim())
                .map_err(|e| format!("step '{}' bound: {}", part, e))?;
            let priority = u8::from_str(priority.trim())
                .map_err(|e| format!("step '{}' priority: {}", part, e))?;
            Ok(PriorityStep { below, priority })
        })
        .collect()
}

/// Inverse of [`parse_priority_steps`]
pub fn format_priority_steps(steps: &[PriorityStep]) -> String {
    steps
        .iter()
        .map(|s| format!("{}:{}", s.below, s.priority))
        .collect::<Vec<_>>()
        .join(",")
}

/// A human validator's language abilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorProfile {
    pub validator_id: String,
    /// Languages the validator can review
    #[serde(default)]
    pub languages: Vec<String>,
    /// Languages the validator speaks natively
    #[serde(default)]
    pub native_languages: Vec<String>,
}

/// Which validators may take an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEligibility {
    pub language_code: Option<String>,
    pub requires_native_speaker: bool,
}

impl ValidatorEligibility {
    /// No language → anyone; language → must speak it; native flag → must be native in it
    pub fn accepts(&self, validator: &ValidatorProfile) -> bool {
        let Some(language) = self.language_code.as_deref() else {
            return true;
        };

        let pool = if self.requires_native_speaker {
            &validator.native_languages
        } else {
            // A native speaker obviously also speaks the language
            if validator.native_languages.iter().any(|l| same_language(l, language)) {
                return true;
            }
            &validator.languages
        };

        pool.iter().any(|l| same_language(l, language))
    }
}

/// Compare language tags on their primary subtag, case-insensitively
///
/// `en-US`, `en_GB` and `EN` are the same language for routing.
pub fn same_language(a: &str, b: &str) -> bool {
    fn primary(tag: &str) -> &str {
        tag.trim().split(['-', '_']).next().unwrap_or("")
    }
    let (a, b) = (primary(a), primary(b));
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

/// Queue routing fields computed for one result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub priority: u8,
    pub band: PriorityBand,
    pub eligibility: ValidatorEligibility,
}

/// Compute priority, band and validator filter
///
/// `requires_native_speaker` comes from the caller and is never inferred.
pub fn route(
    policy: &PriorityPolicy,
    confidence_score: Option<f64>,
    language_code: Option<&str>,
    requires_native_speaker: bool,
) -> RoutingDecision {
    let priority = policy.priority_for(confidence_score);
    RoutingDecision {
        priority,
        band: PriorityBand::from_priority(priority),
        eligibility: ValidatorEligibility {
            language_code: language_code.map(str::to_string),
            requires_native_speaker,
        },
    }
}
