//! 共同空闲槽位计算
//!
//! 取双方忙碌区间的并集，在提示窗口内按粒度步进，收集双方都空闲、
//! 能放下目标时长的槽位。纯函数，便于单测。

use crate::calendar::BusyInterval;
use crate::store::Slot;

/// 槽位查询参数（均为 UTC 毫秒 / 毫秒时长）
#[derive(Debug, Clone, Copy)]
pub struct SlotQuery {
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub duration_ms: i64,
    pub granularity_ms: i64,
    pub max_options: usize,
}

/// 合并排序后重叠 / 相邻的忙碌区间
pub fn merge_busy(mut intervals: Vec<BusyInterval>) -> Vec<BusyInterval> {
    if intervals.is_empty() {
        return intervals;
    }
    intervals.sort_by_key(|b| b.start_ms);
    let mut merged: Vec<BusyInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start_ms <= last.end_ms => {
                last.end_ms = last.end_ms.max(interval.end_ms);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

fn align_up(value: i64, granularity: i64) -> i64 {
    if granularity <= 0 {
        return value;
    }
    // 窗口起点为非负 epoch 毫秒，向上取整到粒度边界
    (value + granularity - 1) / granularity * granularity
}

/// 双方共同空闲槽位：两份忙碌数据并集之外、窗口内按粒度对齐的前 max_options 个
pub fn mutual_slots(
    busy_initiator: &[BusyInterval],
    busy_counterpart: &[BusyInterval],
    query: &SlotQuery,
) -> Vec<Slot> {
    let mut combined: Vec<BusyInterval> = busy_initiator.to_vec();
    combined.extend_from_slice(busy_counterpart);
    let combined = merge_busy(combined);

    let mut slots = Vec::new();
    let mut start = align_up(query.window_start_ms, query.granularity_ms);
    while start + query.duration_ms <= query.window_end_ms && slots.len() < query.max_options {
        let end = start + query.duration_ms;
        let clash = combined.iter().any(|b| b.overlaps(start, end));
        if !clash {
            slots.push(Slot {
                start_ms: start,
                end_ms: end,
            });
        }
        start += query.granularity_ms;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    fn busy(start_min: i64, end_min: i64) -> BusyInterval {
        BusyInterval {
            start_ms: start_min * MIN,
            end_ms: end_min * MIN,
        }
    }

    #[test]
    fn merges_overlapping_intervals() {
        let merged = merge_busy(vec![busy(0, 30), busy(20, 60), busy(90, 120)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].end_ms, 60 * MIN);
    }

    #[test]
    fn finds_gaps_both_parties_free() {
        // 窗口 0-180min，发起方忙 0-30，对方忙 60-90；时长 30，粒度 30
        let query = SlotQuery {
            window_start_ms: 0,
            window_end_ms: 180 * MIN,
            duration_ms: 30 * MIN,
            granularity_ms: 30 * MIN,
            max_options: 10,
        };
        let slots = mutual_slots(&[busy(0, 30)], &[busy(60, 90)], &query);
        let starts: Vec<i64> = slots.iter().map(|s| s.start_ms / MIN).collect();
        assert_eq!(starts, vec![30, 90, 120, 150]);
    }

    #[test]
    fn caps_at_max_options() {
        let query = SlotQuery {
            window_start_ms: 0,
            window_end_ms: 24 * 60 * MIN,
            duration_ms: 30 * MIN,
            granularity_ms: 30 * MIN,
            max_options: 5,
        };
        let slots = mutual_slots(&[], &[], &query);
        assert_eq!(slots.len(), 5);
    }

    #[test]
    fn unaligned_window_start_rounds_up_to_granularity() {
        // 窗口从 7min 开始，粒度 30min：首个候选槽应落在 30min 边界
        let query = SlotQuery {
            window_start_ms: 7 * MIN,
            window_end_ms: 120 * MIN,
            duration_ms: 30 * MIN,
            granularity_ms: 30 * MIN,
            max_options: 10,
        };
        let slots = mutual_slots(&[], &[], &query);
        let starts: Vec<i64> = slots.iter().map(|s| s.start_ms / MIN).collect();
        assert_eq!(starts, vec![30, 60, 90]);
        // 已对齐的起点保持原位
        assert_eq!(align_up(60 * MIN, 30 * MIN), 60 * MIN);
    }

    #[test]
    fn no_slot_when_window_too_small() {
        let query = SlotQuery {
            window_start_ms: 0,
            window_end_ms: 20 * MIN,
            duration_ms: 30 * MIN,
            granularity_ms: 30 * MIN,
            max_options: 5,
        };
        assert!(mutual_slots(&[], &[], &query).is_empty());
    }
}
