//! 排期提示抽取
//!
//! 从自由文本里抽取两类确定性提示：时长（"30 min"、"2 hours"）和
//! 星期几 + 时间段（"sunday 1pm-5pm"、"sunday 1pm to 5pm"）。
//! 星期解析为相对 now 的下一次未来出现；第一个时间缺 am/pm 时继承第二个的。

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use regex::Regex;

static DURATION_MIN_RE: OnceLock<Regex> = OnceLock::new();
static DURATION_HOUR_RE: OnceLock<Regex> = OnceLock::new();
static WEEKDAY_RANGE_RE: OnceLock<Regex> = OnceLock::new();

/// 抽取到的提示，没命中的字段保持 None
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulingHints {
    pub duration_minutes: Option<i64>,
    pub window_start_ms: Option<i64>,
    pub window_end_ms: Option<i64>,
}

/// 从文本抽取排期提示，now 用于定位"下一个周 X"
pub fn extract_hints(text: &str, now: DateTime<Utc>) -> SchedulingHints {
    let mut hints = SchedulingHints {
        duration_minutes: extract_duration(text),
        ..Default::default()
    };
    if let Some((start_ms, end_ms)) = extract_window(text, now) {
        hints.window_start_ms = Some(start_ms);
        hints.window_end_ms = Some(end_ms);
    }
    hints
}

fn extract_duration(text: &str) -> Option<i64> {
    let min_re = DURATION_MIN_RE
        .get_or_init(|| Regex::new(r"(?i)\b(\d{1,3})\s*(?:min|mins|minute|minutes)\b").unwrap());
    if let Some(cap) = min_re.captures(text) {
        return cap[1].parse().ok();
    }
    let hour_re = DURATION_HOUR_RE
        .get_or_init(|| Regex::new(r"(?i)\b(\d{1,2})\s*(?:hour|hours|hr|hrs)\b").unwrap());
    if let Some(cap) = hour_re.captures(text) {
        return cap[1].parse::<i64>().ok().map(|h| h * 60);
    }
    None
}

fn extract_window(text: &str, now: DateTime<Utc>) -> Option<(i64, i64)> {
    let re = WEEKDAY_RANGE_RE.get_or_init(|| {
        Regex::new(
            r"(?ix)\b
              (monday|tuesday|wednesday|thursday|friday|saturday|sunday)\s+
              (\d{1,2})(?::(\d{2}))?\s*(am|pm)?
              \s*(?:-|–|to)\s*
              (\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b",
        )
        .unwrap()
    });
    let cap = re.captures(text)?;

    let weekday = parse_weekday(&cap[1])?;
    // 第一个时间缺 am/pm 时继承第二个时间的标记
    let second_meridiem = cap.get(7).map(|m| m.as_str().to_lowercase());
    let first_meridiem = cap
        .get(4)
        .map(|m| m.as_str().to_lowercase())
        .or_else(|| second_meridiem.clone());

    let start_h = to_hour24(cap[2].parse().ok()?, first_meridiem.as_deref())?;
    let start_m: u32 = cap.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let end_h = to_hour24(cap[5].parse().ok()?, second_meridiem.as_deref())?;
    let end_m: u32 = cap.get(6).map_or(Some(0), |m| m.as_str().parse().ok())?;
    if (end_h, end_m) <= (start_h, start_m) {
        return None;
    }

    let today = now.date_naive();
    let mut days_ahead =
        (weekday.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
    let mut date = today + Duration::days(days_ahead);
    let end_of_day = |d: chrono::NaiveDate| {
        Utc.from_utc_datetime(&d.and_hms_opt(end_h, end_m, 0).unwrap_or_default())
    };
    // 当天同一星期，但时段已经过去，顺延到下周
    if days_ahead == 0 && end_of_day(date) <= now {
        days_ahead = 7;
        date = today + Duration::days(days_ahead);
    }

    let start = Utc.from_utc_datetime(&date.and_hms_opt(start_h, start_m, 0)?);
    let end = Utc.from_utc_datetime(&date.and_hms_opt(end_h, end_m, 0)?);
    Some((start.timestamp_millis(), end.timestamp_millis()))
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.to_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn to_hour24(hour12: u32, meridiem: Option<&str>) -> Option<u32> {
    match meridiem {
        Some("pm") if hour12 < 12 => Some(hour12 + 12),
        Some("am") if hour12 == 12 => Some(0),
        Some(_) if hour12 <= 12 => Some(hour12),
        // 没有任何 am/pm 标记时按 24 小时制理解
        None if hour12 < 24 => Some(hour12),
        _ => None,
    }
}
