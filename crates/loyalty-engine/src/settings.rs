//! 引擎运行参数
//!
//! 由共享配置 `LoyaltyConfig` 转换而来，字符串配置在这里解析为强类型。

use std::collections::HashSet;

use chrono::Duration;
use loyalty_shared::config::LoyaltyConfig;

use crate::error::{LoyaltyError, Result};
use crate::models::BookingSource;

/// 引擎运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// 不累积积分的渠道
    pub ota_sources: HashSet<BookingSource>,
    pub large_award_threshold: i64,
    pub rapid_accumulation_threshold: i64,
    pub rapid_window: Duration,
    pub excessive_bookings_threshold: i64,
    pub booking_window: Duration,
    pub sweep_concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ota_sources: HashSet::from([
                BookingSource::OtaBookingCom,
                BookingSource::OtaMmt,
                BookingSource::OtaGoibibo,
                BookingSource::OtaYatra,
                BookingSource::OtaAgoda,
            ]),
            large_award_threshold: 100_000,
            rapid_accumulation_threshold: 50_000,
            rapid_window: Duration::hours(24),
            excessive_bookings_threshold: 10,
            booking_window: Duration::days(7),
            sweep_concurrency: 8,
        }
    }
}

impl TryFrom<&LoyaltyConfig> for EngineSettings {
    type Error = LoyaltyError;

    fn try_from(config: &LoyaltyConfig) -> Result<Self> {
        let ota_sources = config
            .ota_sources
            .iter()
            .map(|s| s.parse::<BookingSource>().map_err(LoyaltyError::Validation))
            .collect::<Result<HashSet<_>>>()?;

        Ok(Self {
            ota_sources,
            large_award_threshold: config.large_award_threshold,
            rapid_accumulation_threshold: config.rapid_accumulation_threshold,
            rapid_window: Duration::hours(config.rapid_window_hours),
            excessive_bookings_threshold: config.excessive_bookings_threshold,
            booking_window: Duration::days(config.booking_window_days),
            sweep_concurrency: config.sweep_concurrency.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_default_config_match_defaults() {
        let settings = EngineSettings::try_from(&LoyaltyConfig::default()).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_unknown_ota_source_is_rejected() {
        let config = LoyaltyConfig {
            ota_sources: vec!["OTA_EXPEDIA".to_string()],
            ..Default::default()
        };
        let err = EngineSettings::try_from(&config).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_ota_sources_parse_case_insensitively() {
        let config = LoyaltyConfig {
            ota_sources: vec![" ota_agoda ".to_string(), "Phone".to_string()],
            ..Default::default()
        };
        let settings = EngineSettings::try_from(&config).unwrap();
        assert_eq!(
            settings.ota_sources,
            HashSet::from([BookingSource::OtaAgoda, BookingSource::Phone])
        );
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = LoyaltyConfig {
            sweep_concurrency: 0,
            ..Default::default()
        };
        let settings = EngineSettings::try_from(&config).unwrap();
        assert_eq!(settings.sweep_concurrency, 1);
    }
}
