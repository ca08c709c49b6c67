//! Runtime settings for vqa-review
//!
//! Bootstrap values (database path, bind address, port, log level) come from
//! the TOML file handled by `vqa_common::config`. Everything tunable at
//! runtime lives in the `settings` table. Missing or NULL keys are filled in
//! with built-in defaults, which are written back so the table always shows
//! the effective values.

use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use vqa_common::db::{get_setting, set_setting};
use vqa_common::{Error, Result};

use crate::decision::DecisionThresholds;
use crate::queue::{AdmissionMode, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::routing::{format_priority_steps, parse_priority_steps, PriorityPolicy};

pub const KEY_MIN_ASR_CONFIDENCE: &str = "decision_min_asr_confidence";
pub const KEY_REQUIRE_COMMAND_KIND_MATCH: &str = "decision_require_command_kind_match";
pub const KEY_ENSEMBLE_PASS_RATIO: &str = "decision_ensemble_pass_ratio";
pub const KEY_PRIORITY_STEPS: &str = "routing_priority_steps";
pub const KEY_PRIORITY_CEILING: &str = "routing_priority_ceiling";
pub const KEY_DEFAULT_PRIORITY: &str = "routing_default_priority";
pub const KEY_ADMISSION_MODE: &str = "queue_admission_mode";
pub const KEY_PAGE_SIZE: &str = "queue_page_size";
pub const KEY_MAX_LOCK_WAIT_MS: &str = "db_max_lock_wait_ms";
pub const KEY_EVENT_BUS_CAPACITY: &str = "event_bus_capacity";

/// Default bound on retrying a locked database
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;
/// Default broadcast buffer for queue events
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1000;

/// Runtime settings loaded from the database
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub thresholds: DecisionThresholds,
    pub priority_policy: PriorityPolicy,
    pub admission_mode: AdmissionMode,
    pub page_size: u32,
    pub max_lock_wait_ms: u64,
    pub event_bus_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            thresholds: DecisionThresholds::default(),
            priority_policy: PriorityPolicy::default(),
            admission_mode: AdmissionMode::SingleActive,
            page_size: DEFAULT_PAGE_SIZE,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        }
    }
}

impl RuntimeSettings {
    /// Load all settings, writing defaults back for missing keys
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let thresholds = DecisionThresholds {
            min_asr_confidence: setting_or_default(
                pool,
                KEY_MIN_ASR_CONFIDENCE,
                defaults.thresholds.min_asr_confidence,
            )
            .await?,
            require_command_kind_match: setting_or_default(
                pool,
                KEY_REQUIRE_COMMAND_KIND_MATCH,
                defaults.thresholds.require_command_kind_match,
            )
            .await?,
            ensemble_pass_ratio: setting_or_default(
                pool,
                KEY_ENSEMBLE_PASS_RATIO,
                defaults.thresholds.ensemble_pass_ratio,
            )
            .await?,
        };
        thresholds.validate().map_err(Error::Config)?;

        let steps_text: String = setting_or_default(
            pool,
            KEY_PRIORITY_STEPS,
            format_priority_steps(defaults.priority_policy.steps()),
        )
        .await?;
        let steps = parse_priority_steps(&steps_text)
            .map_err(|e| Error::Config(format!("{}: {}", KEY_PRIORITY_STEPS, e)))?;
        let ceiling: u8 = setting_or_default(
            pool,
            KEY_PRIORITY_CEILING,
            defaults.priority_policy.ceiling(),
        )
        .await?;
        let default_priority: u8 = setting_or_default(
            pool,
            KEY_DEFAULT_PRIORITY,
            defaults.priority_policy.default_priority(),
        )
        .await?;
        let priority_policy = PriorityPolicy::new(steps, ceiling, default_priority)
            .map_err(|e| Error::Config(format!("priority policy: {}", e)))?;

        let admission_mode: AdmissionMode =
            setting_or_default(pool, KEY_ADMISSION_MODE, defaults.admission_mode).await?;

        let page_size: u32 = setting_or_default(pool, KEY_PAGE_SIZE, defaults.page_size).await?;
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "{} must be within 1..={}, got {}",
                KEY_PAGE_SIZE, MAX_PAGE_SIZE, page_size
            )));
        }

        let max_lock_wait_ms =
            setting_or_default(pool, KEY_MAX_LOCK_WAIT_MS, defaults.max_lock_wait_ms).await?;

        let event_bus_capacity: usize =
            setting_or_default(pool, KEY_EVENT_BUS_CAPACITY, defaults.event_bus_capacity).await?;
        if event_bus_capacity == 0 {
            return Err(Error::Config(format!("{} must be positive", KEY_EVENT_BUS_CAPACITY)));
        }

        let settings = Self {
            thresholds,
            priority_policy,
            admission_mode,
            page_size,
            max_lock_wait_ms,
            event_bus_capacity,
        };

        info!(
            admission_mode = %settings.admission_mode,
            page_size = settings.page_size,
            max_lock_wait_ms = settings.max_lock_wait_ms,
            "Loaded runtime settings from database"
        );
        Ok(settings)
    }
}

async fn setting_or_default<T>(pool: &SqlitePool, key: &str, default: T) -> Result<T>
where
    T: FromStr + ToString,
{
    match get_setting::<T>(pool, key).await? {
        Some(value) => Ok(value),
        None => {
            info!(
                "Setting '{}' not found in database, using default: {}",
                key,
                default.to_string()
            );
            set_setting(pool, key, default.to_string()).await?;
            Ok(default)
        }
    }
}
