// ==========================================
// 考勤对账引擎 - 对账规则配置
// ==========================================
// 职责: 强类型、带版本号的规则配置, 每个批次加载一次并按值传递
// 红线: 劳动法相关阈值 (正常工时上限/加班档位/夜班窗口) 不内置默认值
// ==========================================

use crate::domain::types::OvertimeBucket;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECS_PER_DAY: i64 = 86_400;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("缺少必填配置: {0}")]
    MissingKey(String),

    #[error("配置值非法 (key={key}): {message}")]
    InvalidValue { key: String, message: String },

    #[error("配置存储访问失败: {0}")]
    Storage(String),
}

// ==========================================
// TimeWindow - 当日时间窗口 (可跨午夜)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// 是否跨越午夜 (例如 19:00 - 06:00)
    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// 拆分为当日内的秒区间 [from, to)
    pub fn segments(&self) -> Vec<(i64, i64)> {
        let start = crate::domain::attendance::seconds_of_day(self.start);
        let end = crate::domain::attendance::seconds_of_day(self.end);

        if start == end {
            Vec::new()
        } else if start < end {
            vec![(start, end)]
        } else {
            vec![(0, end), (start, SECS_PER_DAY)]
        }
    }

    /// 区间 [from, to) 落在窗口内的秒数
    pub fn overlap_secs(&self, from: i64, to: i64) -> i64 {
        if to <= from {
            return 0;
        }
        self.segments()
            .into_iter()
            .map(|(ws, we)| (to.min(we) - from.max(ws)).max(0))
            .sum()
    }
}

// ==========================================
// OvertimeTier - 加班档位
// ==========================================
// up_to_secs 为超出正常工时后的累计边界; None 表示不封顶
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvertimeTier {
    pub up_to_secs: Option<i64>,
    pub bucket: OvertimeBucket,
}

/// 配置表中的档位格式 (分钟)
///
/// 例: [{"up_to_minutes":120,"bucket":"RECARGO_25"},{"up_to_minutes":null,"bucket":"SUPLEMENTARIO_50"}]
#[derive(Debug, Clone, Deserialize)]
pub struct OvertimeTierSpec {
    pub up_to_minutes: Option<i64>,
    pub bucket: OvertimeBucket,
}

impl From<OvertimeTierSpec> for OvertimeTier {
    fn from(spec: OvertimeTierSpec) -> Self {
        Self {
            up_to_secs: spec.up_to_minutes.map(|m| m * 60),
            bucket: spec.bucket,
        }
    }
}

// ==========================================
// ReconcileConfig - 对账配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub config_version: i64,                   // 配置版本号 (写入记录, 便于追溯)
    pub dedup_threshold_secs: i64,             // 重复打卡判定阈值
    pub regular_daily_cap_secs: i64,           // 每日正常工时上限
    pub overtime_tiers: Vec<OvertimeTier>,     // 加班档位 (升序)
    pub night_window: TimeWindow,              // 夜班窗口
    pub gap_threshold_secs: i64,               // 设备通讯缺口阈值
    pub activity_window: Option<TimeWindow>,   // 设备预期活动窗口
    pub max_conflict_retries: u32,             // 乐观锁冲突最大重试次数
    pub worker_count: usize,                   // 并行分组数
}

impl ReconcileConfig {
    pub const DEFAULT_DEDUP_THRESHOLD_SECS: i64 = 60;
    pub const DEFAULT_GAP_THRESHOLD_SECS: i64 = 120 * 60;
    pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;
    pub const DEFAULT_WORKER_COUNT: usize = 4;

    /// 校验配置一致性
    ///
    /// # 规则
    /// - 正常工时上限、缺口阈值必须为正
    /// - 去重阈值不能为负
    /// - 档位边界严格递增, 仅最后一档可不封顶
    /// - 档位加成比例不能下降
    /// - 夜班窗口起止不能相同
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regular_daily_cap_secs <= 0 {
            return Err(invalid("regular_daily_cap_minutes", "必须大于 0"));
        }
        if self.dedup_threshold_secs < 0 {
            return Err(invalid("dedup_threshold_secs", "不能为负数"));
        }
        if self.gap_threshold_secs <= 0 {
            return Err(invalid("gap_threshold_minutes", "必须大于 0"));
        }
        if self.worker_count == 0 {
            return Err(invalid("worker_count", "至少为 1"));
        }
        if self.night_window.start == self.night_window.end {
            return Err(invalid("night_window", "起止时间不能相同"));
        }

        let mut last_bound = 0_i64;
        let mut last_pct = 0_u32;
        for (idx, tier) in self.overtime_tiers.iter().enumerate() {
            let is_last = idx + 1 == self.overtime_tiers.len();
            match tier.up_to_secs {
                Some(bound) if bound <= last_bound => {
                    return Err(invalid(
                        "overtime_tiers",
                        &format!("第 {} 档边界必须严格递增", idx + 1),
                    ));
                }
                Some(bound) => last_bound = bound,
                None if !is_last => {
                    return Err(invalid("overtime_tiers", "只有最后一档可以不封顶"));
                }
                None => {}
            }

            let pct = tier.bucket.surcharge_pct();
            if pct < last_pct {
                return Err(invalid("overtime_tiers", "档位加成比例不能下降"));
            }
            last_pct = pct;
        }

        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn base_config() -> ReconcileConfig {
        ReconcileConfig {
            config_version: 1,
            dedup_threshold_secs: 60,
            regular_daily_cap_secs: 8 * 3600,
            overtime_tiers: vec![
                OvertimeTier { up_to_secs: Some(2 * 3600), bucket: OvertimeBucket::Recargo25 },
                OvertimeTier { up_to_secs: Some(4 * 3600), bucket: OvertimeBucket::Suplementario50 },
            ],
            night_window: TimeWindow::new(t(19, 0), t(6, 0)),
            gap_threshold_secs: 7200,
            activity_window: None,
            max_conflict_retries: 3,
            worker_count: 2,
        }
    }

    #[test]
    fn test_night_window_wraps_midnight() {
        let window = TimeWindow::new(t(19, 0), t(6, 0));
        assert!(window.wraps_midnight());
        assert_eq!(window.segments(), vec![(0, 6 * 3600), (19 * 3600, 86_400)]);

        // 17:00 - 21:00 → 19:00 起两小时
        assert_eq!(window.overlap_secs(17 * 3600, 21 * 3600), 2 * 3600);
        // 05:00 - 08:00 → 05:00 - 06:00 一小时
        assert_eq!(window.overlap_secs(5 * 3600, 8 * 3600), 3600);
        // 白天完全不重叠
        assert_eq!(window.overlap_secs(8 * 3600, 17 * 3600), 0);
    }

    #[test]
    fn test_plain_window_overlap() {
        let window = TimeWindow::new(t(22, 0), t(23, 30));
        assert!(!window.wraps_midnight());
        assert_eq!(window.overlap_secs(21 * 3600, 23 * 3600), 3600);
    }

    #[test]
    fn test_validate_accepts_base_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_ascending_tiers() {
        let mut config = base_config();
        config.overtime_tiers[1].up_to_secs = Some(3600);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "overtime_tiers"
        ));
    }

    #[test]
    fn test_validate_rejects_unbounded_middle_tier() {
        let mut config = base_config();
        config.overtime_tiers[0].up_to_secs = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_decreasing_surcharge() {
        let mut config = base_config();
        config.overtime_tiers[0].bucket = OvertimeBucket::Extraordinario100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_spec_converts_minutes() {
        let specs: Vec<OvertimeTierSpec> = serde_json::from_str(
            r#"[{"up_to_minutes":120,"bucket":"RECARGO_25"},{"up_to_minutes":null,"bucket":"SUPLEMENTARIO_50"}]"#,
        )
        .unwrap();
        let tiers: Vec<OvertimeTier> = specs.into_iter().map(OvertimeTier::from).collect();
        assert_eq!(tiers[0].up_to_secs, Some(7200));
        assert_eq!(tiers[1].up_to_secs, None);
        assert_eq!(tiers[1].bucket, OvertimeBucket::Suplementario50);
    }
}
