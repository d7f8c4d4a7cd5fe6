// ==========================================
// 考勤对账引擎 - 打卡配对
// ==========================================
// 输入: 当日有效打卡 (按时间合并排序)
// 输出: 四槽位骨架 + 无法落位的打卡
// 规则: 进 → 出(严格晚于进) → 进2 → 出2, 只区分进/出两类
// 红线: 无法落位的打卡不丢弃, 交给异常判定
// ==========================================

use crate::domain::attendance::DaySlots;
use crate::domain::punch::PunchEvent;
use crate::domain::types::MovementKind;
use chrono::NaiveTime;

/// 无法落位的打卡
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnassignablePunch {
    pub punch_id: String,
    pub punch_time: NaiveTime,
    pub movement: MovementKind,
    pub reason: String,
}

/// 配对结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairingOutcome {
    pub slots: DaySlots,
    pub unassignable: Vec<UnassignablePunch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitEntry,
    AwaitExit,
    AwaitEntry2,
    AwaitExit2,
    Filled,
}

// ==========================================
// PunchPairer - 打卡配对器
// ==========================================
#[derive(Debug, Default)]
pub struct PunchPairer;

impl PunchPairer {
    pub fn new() -> Self {
        Self
    }

    /// 将有效打卡依次落入槽位
    pub fn pair(&self, effective: &[PunchEvent]) -> PairingOutcome {
        let mut ordered: Vec<&PunchEvent> = effective.iter().collect();
        ordered.sort_by(|a, b| {
            a.punch_time
                .cmp(&b.punch_time)
                .then_with(|| a.punch_id.cmp(&b.punch_id))
        });

        let mut outcome = PairingOutcome::default();
        let mut stage = Stage::AwaitEntry;

        for punch in ordered {
            let t = punch.punch_time;
            let is_entry = punch.movement.is_entry();

            let rejected = match stage {
                Stage::AwaitEntry if is_entry => {
                    outcome.slots.entry = Some(t);
                    stage = Stage::AwaitExit;
                    None
                }
                Stage::AwaitEntry => Some("出卡早于任何进卡"),
                Stage::AwaitExit if is_entry => Some("连续两次进卡, 中间缺少出卡"),
                Stage::AwaitExit => match outcome.slots.entry {
                    Some(entry) if t > entry => {
                        outcome.slots.exit = Some(t);
                        stage = Stage::AwaitEntry2;
                        None
                    }
                    _ => Some("出卡未晚于进卡"),
                },
                Stage::AwaitEntry2 if !is_entry => Some("连续两次出卡, 中间缺少进卡"),
                Stage::AwaitEntry2 => match outcome.slots.exit {
                    Some(exit) if t > exit => {
                        outcome.slots.entry2 = Some(t);
                        stage = Stage::AwaitExit2;
                        None
                    }
                    _ => Some("第二次进卡未晚于出卡"),
                },
                Stage::AwaitExit2 if is_entry => Some("连续两次进卡, 中间缺少出卡"),
                Stage::AwaitExit2 => match outcome.slots.entry2 {
                    Some(entry2) if t > entry2 => {
                        outcome.slots.exit2 = Some(t);
                        stage = Stage::Filled;
                        None
                    }
                    _ => Some("第二次出卡未晚于第二次进卡"),
                },
                Stage::Filled => Some("四个槽位已满"),
            };

            if let Some(reason) = rejected {
                outcome.unassignable.push(UnassignablePunch {
                    punch_id: punch.punch_id.clone(),
                    punch_time: t,
                    movement: punch.movement,
                    reason: reason.to_string(),
                });
            }
        }

        outcome
    }
}
