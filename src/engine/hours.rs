// ==========================================
// 考勤对账引擎 - 工时计算
// ==========================================
// 输入: 四槽位骨架 + 外部配置 (正常工时上限 / 加班档位 / 夜班窗口)
// 输出: HoursBreakdown (单位: 秒)
// 红线: 全程整数秒, 不做中间取整
// 红线: 夜班是叠加维度, 与正常/加班拆分相互独立
// ==========================================

use crate::config::{OvertimeTier, ReconcileConfig, TimeWindow};
use crate::domain::attendance::{seconds_of_day, DaySlots, HoursBreakdown};
use crate::domain::types::OvertimeBucket;
use chrono::NaiveTime;

// ==========================================
// HoursCalculator - 工时计算器
// ==========================================
#[derive(Debug, Clone)]
pub struct HoursCalculator {
    regular_daily_cap_secs: i64,
    overtime_tiers: Vec<OvertimeTier>,
    night_window: TimeWindow,
}

impl HoursCalculator {
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            regular_daily_cap_secs: config.regular_daily_cap_secs,
            overtime_tiers: config.overtime_tiers.clone(),
            night_window: config.night_window,
        }
    }

    /// 计算工时分桶
    ///
    /// - lunch = entry2 - exit (两者都有时)
    /// - worked = (exit - entry) + (exit2 - entry2)
    /// - regular = min(worked, cap), 其余按档位逐级消耗
    pub fn calculate(&self, slots: &DaySlots) -> HoursBreakdown {
        let spans = Self::worked_spans(slots);
        let worked_secs: i64 = spans.iter().map(|(from, to)| to - from).sum();

        let lunch_secs = match (slots.exit, slots.entry2) {
            (Some(exit), Some(entry2)) => (seconds_of_day(entry2) - seconds_of_day(exit)).max(0),
            _ => 0,
        };

        let regular_secs = worked_secs.min(self.regular_daily_cap_secs);
        let mut hours = HoursBreakdown {
            worked_secs,
            lunch_secs,
            regular_secs,
            ..HoursBreakdown::default()
        };
        self.split_overtime(worked_secs - regular_secs, &mut hours);

        hours.night_secs = spans
            .iter()
            .map(|&(from, to)| self.night_window.overlap_secs(from, to))
            .sum();

        hours
    }

    /// 工作区间 (当日秒数, 左闭右开)
    fn worked_spans(slots: &DaySlots) -> Vec<(i64, i64)> {
        let mut spans = Vec::with_capacity(2);
        let mut push = |from: Option<NaiveTime>, to: Option<NaiveTime>| {
            if let (Some(from), Some(to)) = (from, to) {
                let (from, to) = (seconds_of_day(from), seconds_of_day(to));
                if to > from {
                    spans.push((from, to));
                }
            }
        };
        push(slots.entry, slots.exit);
        push(slots.entry2, slots.exit2);
        spans
    }

    /// 按档位升序消耗加班; 超出最后一个封顶档位的部分计入 100% 档
    fn split_overtime(&self, overtime_secs: i64, hours: &mut HoursBreakdown) {
        let mut remaining = overtime_secs;
        let mut lower_bound = 0_i64;

        for tier in &self.overtime_tiers {
            if remaining <= 0 {
                break;
            }
            let taken = match tier.up_to_secs {
                Some(upper) => remaining.min((upper - lower_bound).max(0)),
                None => remaining,
            };
            Self::add_to_bucket(hours, tier.bucket, taken);
            remaining -= taken;
            if let Some(upper) = tier.up_to_secs {
                lower_bound = upper;
            }
        }

        if remaining > 0 {
            Self::add_to_bucket(hours, OvertimeBucket::Extraordinario100, remaining);
        }
    }

    fn add_to_bucket(hours: &mut HoursBreakdown, bucket: OvertimeBucket, secs: i64) {
        match bucket {
            OvertimeBucket::Recargo25 => hours.recargo25_secs += secs,
            OvertimeBucket::Suplementario50 => hours.suplementario50_secs += secs,
            OvertimeBucket::Extraordinario100 => hours.extraordinario100_secs += secs,
        }
    }
}
