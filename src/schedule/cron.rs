// Copyright 2025 The Scheduled Scaling Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Five-field cron expressions on top of the `cron` crate.
//!
//! The crate expects a leading seconds field and numbers days of the week
//! 1 (Sunday) to 7 (Saturday), while schedules are written in the classic
//! `minute hour day-of-month month day-of-week` form with 0/7 = Sunday. The
//! expression is rewritten once at parse time; iteration happens in the
//! schedule's own zone so wall-clock times follow DST.
//!
//! Classic cron fires when either day field matches if both are restricted,
//! the crate requires both. Such expressions are split into a day-of-month
//! half and a day-of-week half and their starts are merged.

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// How far back to look for a window that may still cover `now`. One day
/// (the longest allowed duration) plus an hour of DST slack.
pub const LOOKBACK: TimeDelta = TimeDelta::hours(25);

// an every-minute expression yields this many starts inside the lookback
const MAX_LOOKBACK_STEPS: usize = 25 * 60 + 1;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed expression: one crate schedule, or two when the day fields are
/// OR-ed.
#[derive(Clone, Debug)]
pub struct CronExpression {
    schedules: Vec<cron::Schedule>,
}

pub fn parse(expression: &str) -> Result<CronExpression, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let [minute, hour, day_of_month, month, day_of_week] = fields[..] else {
        return Err(format!(
            "expected 5 fields (minute hour day-of-month month day-of-week), got {}",
            fields.len()
        ));
    };

    let translated = translate_day_of_week(day_of_week)?;
    let build = |day_of_month: &str, day_of_week: &str| {
        let normalized = format!("0 {minute} {hour} {day_of_month} {month} {day_of_week}");
        cron::Schedule::from_str(&normalized).map_err(|e| e.to_string())
    };

    let schedules = if is_restricted(day_of_month) && is_restricted(day_of_week) {
        vec![build(day_of_month, "*")?, build("*", translated.as_str())?]
    } else {
        vec![build(day_of_month, translated.as_str())?]
    };
    Ok(CronExpression { schedules })
}

// a field starting with `*` leaves the other day field in charge
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

impl CronExpression {
    /// The last scheduled start at or before `now`, searching back [`LOOKBACK`].
    pub fn latest_start(&self, zone: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = (now - LOOKBACK).with_timezone(&zone);
        self.schedules
            .iter()
            .filter_map(|schedule| {
                schedule
                    .after(&from)
                    .map(|start| start.with_timezone(&Utc))
                    .take_while(|start| *start <= now)
                    .take(MAX_LOOKBACK_STEPS)
                    .last()
            })
            .max()
    }

    /// The first scheduled start at or after `from`.
    pub fn first_start_from(&self, zone: Tz, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // the iterator is exclusive, step back so a start exactly at `from` is kept
        let before = (from - TimeDelta::seconds(1)).with_timezone(&zone);
        self.schedules
            .iter()
            .filter_map(|schedule| {
                schedule
                    .after(&before)
                    .map(|start| start.with_timezone(&Utc))
                    .take(2)
                    .find(|start| *start >= from)
            })
            .min()
    }
}

fn translate_day_of_week(field: &str) -> Result<String, String> {
    let items = field
        .split(',')
        .map(translate_day_of_week_item)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items.join(","))
}

fn translate_day_of_week_item(item: &str) -> Result<String, String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => {
            let step: u32 = step
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| format!("invalid day-of-week step '{step}'"))?;
            (base, Some(step))
        }
        None => (item, None),
    };
    let suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

    if base == "*" || base == "?" {
        return Ok(format!("{base}{suffix}"));
    }

    match base.split_once('-') {
        None => Ok(format!("{}{suffix}", day_number(base)?)),
        Some((first, last)) => {
            let first = day_number(first)?;
            // 7 closing a range is the Sunday after Saturday
            let last = if last == "7" { 8 } else { day_number(last)? };

            if first <= last && last <= 7 {
                Ok(format!("{first}-{last}{suffix}"))
            } else if first == 1 && last == 8 {
                Ok(format!("1-7{suffix}"))
            } else if step.is_some() {
                Err(format!(
                    "stepped day-of-week range '{item}' cannot wrap past Saturday"
                ))
            } else {
                let last = if last == 8 { 1 } else { last };
                if last == 1 {
                    Ok(format!("{first}-7,1"))
                } else {
                    Ok(format!("{first}-7,1-{last}"))
                }
            }
        }
    }
}

/// Maps a classic day-of-week token to the crate's 1 (Sunday) ..= 7 (Saturday).
fn day_number(token: &str) -> Result<u32, String> {
    if let Ok(n) = token.parse::<u32>() {
        return match n {
            0..=7 => Ok(n % 7 + 1),
            _ => Err(format!("day-of-week {n} is out of range 0-7")),
        };
    }

    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .map(|p| p as u32 + 1)
        .ok_or_else(|| format!("unknown day-of-week '{token}'"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_translate_day_of_week() {
        assert_eq!(translate_day_of_week("1-5").unwrap(), "2-6");
        assert_eq!(translate_day_of_week("0,6").unwrap(), "1,7");
        assert_eq!(translate_day_of_week("7").unwrap(), "1");
        assert_eq!(translate_day_of_week("mon-FRI").unwrap(), "2-6");
        assert_eq!(translate_day_of_week("5-7").unwrap(), "6-7,1");
        assert_eq!(translate_day_of_week("0-7").unwrap(), "1-7");
        assert_eq!(translate_day_of_week("SAT-MON").unwrap(), "7-7,1-2");
        assert_eq!(translate_day_of_week("*/2").unwrap(), "*/2");
        assert_eq!(translate_day_of_week("1-5/2").unwrap(), "2-6/2");
    }

    #[test]
    fn test_translate_day_of_week_rejects_bad_tokens() {
        assert!(translate_day_of_week("8").is_err());
        assert!(translate_day_of_week("FUNDAY").is_err());
        assert!(translate_day_of_week("5-0/2").is_err());
        assert!(translate_day_of_week("1/0").is_err());
    }

    #[test]
    fn test_parse_requires_five_fields() {
        assert!(parse("0 9 * * 1-5").is_ok());
        assert!(parse("0 9 * *").is_err());
        assert!(parse("0 0 9 * * 1-5").is_err());
        assert!(parse("61 9 * * *").is_err());
    }

    #[test]
    fn test_weekday_numbering_follows_classic_cron() {
        // "1" is Monday: from Sunday 2024-01-14 the next start is Monday 2024-01-15
        let schedule = parse("0 12 * * 1").unwrap();
        let next = schedule.first_start_from(Tz::UTC, utc("2024-01-14T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-01-15T12:00:00Z"));
    }

    #[test]
    fn test_first_start_from_is_inclusive() {
        let schedule = parse("0 * * * *").unwrap();
        let at = utc("2024-01-15T10:00:00Z");
        assert_eq!(schedule.first_start_from(Tz::UTC, at), Some(at));
    }

    #[test]
    fn test_latest_start_within_lookback() {
        let schedule = parse("0 9 * * *").unwrap();
        let latest = schedule.latest_start(Tz::Asia__Tokyo, utc("2024-01-15T08:00:00Z"));
        assert_eq!(latest, Some(utc("2024-01-15T00:00:00Z")));

        // weekly schedule whose last start is older than the lookback
        let weekly = parse("0 9 * * 0").unwrap();
        let latest = weekly.latest_start(Tz::UTC, utc("2024-01-17T12:00:00Z"));
        assert_eq!(latest, None);
    }

    #[test]
    fn test_restricted_day_fields_match_either() {
        // the 1st of the month or any Monday
        let schedule = parse("0 9 1 * 1").unwrap();
        assert_eq!(
            schedule.first_start_from(Tz::UTC, utc("2024-01-02T00:00:00Z")),
            Some(utc("2024-01-08T09:00:00Z"))
        );
        // Thursday 2024-02-01 only qualifies through its day of month
        assert_eq!(
            schedule.first_start_from(Tz::UTC, utc("2024-01-30T00:00:00Z")),
            Some(utc("2024-02-01T09:00:00Z"))
        );
        assert_eq!(
            schedule.latest_start(Tz::UTC, utc("2024-02-01T10:00:00Z")),
            Some(utc("2024-02-01T09:00:00Z"))
        );
    }

    #[test]
    fn test_wildcard_day_field_keeps_the_other_in_charge() {
        let schedule = parse("0 9 */2 * 1").unwrap();
        // Monday 2024-01-08 is an even day, skipped by */2 starting at 1
        assert_eq!(
            schedule.first_start_from(Tz::UTC, utc("2024-01-02T00:00:00Z")),
            Some(utc("2024-01-15T09:00:00Z"))
        );
    }
}
