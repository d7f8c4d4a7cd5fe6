// ==========================================
// 考勤对账引擎 - 设备通讯缺口检测
// ==========================================
// 输入: 单台设备单日的全部原始打卡 (含重复、含已处理)
// 输出: CommunicationGap 列表 (设备健康信号)
// 红线: 只读诊断, 不修改任何打卡或考勤记录
// ==========================================

use crate::config::{ReconcileConfig, TimeWindow};
use crate::domain::attendance::seconds_of_day;
use crate::domain::gap::{CommunicationGap, GapKind};
use crate::domain::punch::PunchEvent;
use crate::engine::error::ReconcileResult;
use crate::engine::ports::PunchSource;
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use tracing::Span;

/// 检测单台设备单日的通讯缺口
///
/// # 参数
/// - punches: 当日原始打卡 (无需预先排序)
/// - gap_threshold_secs: 相邻打卡间隔超过该值即视为缺口
/// - activity_window: 设备预期活动窗口 (跨午夜的窗口不做首尾检测)
pub fn detect_gaps(
    device_id: &str,
    date: NaiveDate,
    punches: &[PunchEvent],
    gap_threshold_secs: i64,
    activity_window: Option<TimeWindow>,
) -> Vec<CommunicationGap> {
    let mut times: Vec<NaiveTime> = punches
        .iter()
        .filter(|p| !p.is_deleted())
        .map(|p| p.punch_time)
        .collect();
    times.sort();

    let gap = |kind: GapKind, start: NaiveTime, end: NaiveTime| CommunicationGap {
        device_id: device_id.to_string(),
        punch_date: date,
        kind,
        start,
        end,
        duration_secs: seconds_of_day(end) - seconds_of_day(start),
    };

    let mut gaps = Vec::new();

    let window = activity_window.filter(|w| !w.wraps_midnight());
    if let Some(window) = window {
        match (times.first(), times.last()) {
            (Some(&first), Some(&last)) => {
                if first > window.start
                    && seconds_of_day(first) - seconds_of_day(window.start) > gap_threshold_secs
                {
                    gaps.push(gap(GapKind::LeadingSilence, window.start, first));
                }
                if last < window.end
                    && seconds_of_day(window.end) - seconds_of_day(last) > gap_threshold_secs
                {
                    gaps.push(gap(GapKind::TrailingSilence, last, window.end));
                }
            }
            _ => {
                if seconds_of_day(window.end) - seconds_of_day(window.start) > gap_threshold_secs {
                    gaps.push(gap(GapKind::LeadingSilence, window.start, window.end));
                }
            }
        }
    }

    for pair in times.windows(2) {
        let delta = seconds_of_day(pair[1]) - seconds_of_day(pair[0]);
        if delta > gap_threshold_secs {
            gaps.push(gap(GapKind::BetweenPunches, pair[0], pair[1]));
        }
    }

    gaps.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.end.cmp(&b.end)));
    gaps
}

// ==========================================
// IntegrityVerifier - 通讯缺口校验器
// ==========================================
pub struct IntegrityVerifier {
    source: Arc<dyn PunchSource>,
    gap_threshold_secs: i64,
    activity_window: Option<TimeWindow>,
    span: Span,
}

impl IntegrityVerifier {
    pub fn new(source: Arc<dyn PunchSource>, config: &ReconcileConfig, span: Span) -> Self {
        Self {
            source,
            gap_threshold_secs: config.gap_threshold_secs,
            activity_window: config.activity_window,
            span,
        }
    }

    /// 校验日期区间内的设备缺口
    ///
    /// # 参数
    /// - from / to: 闭区间
    /// - device_id: 指定设备; None 表示当日有打卡的全部设备
    pub fn verify(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        device_id: Option<&str>,
    ) -> ReconcileResult<Vec<CommunicationGap>> {
        let mut gaps = Vec::new();

        for date in from.iter_days().take_while(|d| *d <= to) {
            let devices = match device_id {
                Some(device) => vec![device.to_string()],
                None => self.source.list_devices_with_activity(date)?,
            };

            for device in devices {
                let punches = self.source.load_device_day(&device, date)?;
                let found = detect_gaps(
                    &device,
                    date,
                    &punches,
                    self.gap_threshold_secs,
                    self.activity_window,
                );

                for g in &found {
                    tracing::warn!(
                        parent: &self.span,
                        device_id = %g.device_id,
                        date = %g.punch_date,
                        kind = ?g.kind,
                        start = %g.start,
                        end = %g.end,
                        minutes = g.duration_minutes(),
                        "设备通讯缺口"
                    );
                }
                gaps.extend(found);
            }
        }

        tracing::info!(parent: &self.span, %from, %to, gaps = gaps.len(), "缺口校验完成");
        Ok(gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{MovementKind, VerificationKind};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn punch(id: &str, time: NaiveTime) -> PunchEvent {
        PunchEvent {
            punch_id: id.to_string(),
            employee_id: format!("E-{}", id),
            device_id: "D1".to_string(),
            punch_date: date(),
            punch_time: time,
            movement: MovementKind::Entry,
            verification: VerificationKind::Face,
            confidence: None,
            failed_attempts: 0,
            processed: true,
            effective: false,
            attendance_record_id: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_delta_above_threshold_is_reported() {
        let punches = vec![punch("P3", t(13, 0)), punch("P1", t(8, 0)), punch("P2", t(9, 0))];
        let gaps = detect_gaps("D1", date(), &punches, 2 * 3600, None);

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kind, GapKind::BetweenPunches);
        assert_eq!(gaps[0].start, t(9, 0));
        assert_eq!(gaps[0].end, t(13, 0));
        assert_eq!(gaps[0].duration_minutes(), 240);
    }

    #[test]
    fn test_delta_equal_to_threshold_is_not_a_gap() {
        let punches = vec![punch("P1", t(8, 0)), punch("P2", t(10, 0))];
        assert!(detect_gaps("D1", date(), &punches, 2 * 3600, None).is_empty());
    }

    #[test]
    fn test_activity_window_reports_silence_at_both_ends() {
        let window = TimeWindow::new(t(6, 0), t(22, 0));
        let punches = vec![punch("P1", t(9, 0)), punch("P2", t(10, 0))];
        let gaps = detect_gaps("D1", date(), &punches, 2 * 3600, Some(window));

        let kinds: Vec<GapKind> = gaps.iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![GapKind::LeadingSilence, GapKind::TrailingSilence]);
        assert_eq!(gaps[1].duration_secs, 12 * 3600);
    }

    #[test]
    fn test_silent_device_with_window_is_one_gap() {
        let window = TimeWindow::new(t(6, 0), t(22, 0));
        let gaps = detect_gaps("D1", date(), &[], 2 * 3600, Some(window));
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].duration_secs, 16 * 3600);
    }
}
