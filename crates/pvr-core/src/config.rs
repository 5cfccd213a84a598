//! PvrConfig - 実行時設定
//!
//! JSON 文字列かファイルから読み込みます。省略したフィールドはすべて default。

use std::path::Path;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Padding, SortMode};

const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PvrConfig {
    /// Applied when a request carries no padding of its own.
    pub default_padding: Padding,
    pub viewer_grace_period_secs: u64,
    /// Added on top of the grace period when checking an imminent task.
    pub about_to_start_buffer_secs: u64,
    /// Rows per Store page.
    pub page_size: usize,
    /// Local wall-clock offset used for time-of-day and weekday derivation.
    pub utc_offset_minutes: i32,
    pub sort_mode: SortMode,
}

impl Default for PvrConfig {
    fn default() -> Self {
        Self {
            default_padding: Padding::new(60_000, 180_000),
            viewer_grace_period_secs: 60,
            about_to_start_buffer_secs: 10,
            page_size: 50,
            utc_offset_minutes: 0,
            sort_mode: SortMode::ByDate,
        }
    }
}

impl PvrConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PvrConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigError::Invalid {
                field: "utc_offset_minutes",
                reason: format!("{} is outside +/-14h", self.utc_offset_minutes),
            });
        }
        Ok(())
    }

    /// Grace period plus fixed buffer, as a chrono duration.
    pub fn about_to_start_lead(&self) -> chrono::Duration {
        let secs = self
            .viewer_grace_period_secs
            .saturating_add(self.about_to_start_buffer_secs);
        chrono::Duration::seconds(secs.min(u64::from(u32::MAX)) as i64)
    }

    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    /// Local calendar date of an instant.
    pub fn local_date(&self, at: chrono::DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.local_offset()).date_naive()
    }

    pub fn local_time(&self, at: chrono::DateTime<Utc>) -> NaiveTime {
        at.with_timezone(&self.local_offset()).time()
    }
}
