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

//! Schedule evaluation.
//!
//! A [`Schedule`] from the resource is compiled into a [`CompiledSchedule`],
//! a closed `{Time, Cron}` variant that answers whether an instant falls in a
//! window and where the next window lies. Compilation is the validation: a
//! schedule that compiles is valid. Nothing here reads the clock; callers pass
//! `now` in.

pub mod cron;
pub mod duration;
mod error;

pub use error::{Error, ErrorKind};

use crate::types::v1alpha1::scheduled_scaling::Schedule;
use chrono::{DateTime, FixedOffset, SecondsFormat, TimeDelta, Utc};
use chrono_tz::Tz;
use error::{BadFormatSnafu, FieldConflictSnafu, MissingFieldSnafu, OutOfRangeSnafu};
use std::time::Duration;

pub const TYPE_TIME: &str = "time";
pub const TYPE_CRON: &str = "cron";
pub const DEFAULT_TIME_ZONE: &str = "Asia/Tokyo";

const MIN_DURATION: Duration = Duration::from_secs(60);
const MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

/// Half-open interval `[start, end)` in UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub enum CompiledSchedule {
    Time(TimeSchedule),
    Cron(CronSchedule),
}

#[derive(Clone, Debug)]
pub struct TimeSchedule {
    start_at: DateTime<FixedOffset>,
    finish_at: DateTime<FixedOffset>,
}

#[derive(Clone, Debug)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::CronExpression,
    duration: TimeDelta,
    duration_text: String,
    zone: Tz,
    zone_text: Option<String>,
}

pub fn validate(schedule: &Schedule) -> Result<(), Error> {
    compile(schedule).map(|_| ())
}

pub fn compile(schedule: &Schedule) -> Result<CompiledSchedule, Error> {
    match schedule.type_.as_str() {
        TYPE_TIME => compile_time(schedule).map(CompiledSchedule::Time),
        TYPE_CRON => compile_cron(schedule).map(CompiledSchedule::Cron),
        other => error::UnknownTypeSnafu {
            schedule_type: other,
        }
        .fail(),
    }
}

// empty strings count as unset, the API server does not distinguish them for us
fn field(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn compile_time(schedule: &Schedule) -> Result<TimeSchedule, Error> {
    if field(&schedule.cron_expression).is_some() {
        return FieldConflictSnafu {
            field: "cronExpression",
            schedule_type: TYPE_TIME,
        }
        .fail();
    }
    if field(&schedule.duration).is_some() {
        return FieldConflictSnafu {
            field: "duration",
            schedule_type: TYPE_TIME,
        }
        .fail();
    }

    let start_at = parse_timestamp("startAt", field(&schedule.start_at))?;
    let finish_at = parse_timestamp("finishAt", field(&schedule.finish_at))?;

    if finish_at <= start_at {
        return OutOfRangeSnafu {
            field: "finishAt",
            message: format!(
                "must be after startAt (startAt: {}, finishAt: {})",
                start_at.to_rfc3339(),
                finish_at.to_rfc3339()
            ),
        }
        .fail();
    }

    Ok(TimeSchedule {
        start_at,
        finish_at,
    })
}

fn parse_timestamp(name: &'static str, value: Option<&str>) -> Result<DateTime<FixedOffset>, Error> {
    let value = value.ok_or(Error::MissingField {
        field: name,
        schedule_type: TYPE_TIME,
    })?;

    DateTime::parse_from_rfc3339(value).map_err(|e| Error::BadFormat {
        field: name,
        message: format!("'{value}' is not an RFC3339 timestamp: {e}"),
    })
}

fn compile_cron(schedule: &Schedule) -> Result<CronSchedule, Error> {
    if field(&schedule.start_at).is_some() {
        return FieldConflictSnafu {
            field: "startAt",
            schedule_type: TYPE_CRON,
        }
        .fail();
    }
    if field(&schedule.finish_at).is_some() {
        return FieldConflictSnafu {
            field: "finishAt",
            schedule_type: TYPE_CRON,
        }
        .fail();
    }

    let expression = field(&schedule.cron_expression).ok_or(Error::MissingField {
        field: "cronExpression",
        schedule_type: TYPE_CRON,
    })?;
    let parsed = cron::parse(expression).map_err(|message| Error::BadFormat {
        field: "cronExpression",
        message,
    })?;

    let duration_text = field(&schedule.duration).ok_or(Error::MissingField {
        field: "duration",
        schedule_type: TYPE_CRON,
    })?;
    let duration = duration::parse(duration_text).ok_or_else(|| Error::BadFormat {
        field: "duration",
        message: format!("'{duration_text}' is not a duration such as 30m or 8h"),
    })?;
    if !(MIN_DURATION..=MAX_DURATION).contains(&duration) {
        return OutOfRangeSnafu {
            field: "duration",
            message: format!("must be between 1m and 24h, got {duration_text}"),
        }
        .fail();
    }
    let duration = TimeDelta::from_std(duration).map_err(|e| Error::OutOfRange {
        field: "duration",
        message: e.to_string(),
    })?;

    let zone_text = field(&schedule.time_zone);
    let zone: Tz = zone_text
        .unwrap_or(DEFAULT_TIME_ZONE)
        .parse()
        .map_err(|_| Error::BadFormat {
            field: "timeZone",
            message: format!("'{}' is not an IANA time zone", zone_text.unwrap_or_default()),
        })?;

    Ok(CronSchedule {
        expression: expression.to_owned(),
        schedule: parsed,
        duration,
        duration_text: duration_text.to_owned(),
        zone,
        zone_text: zone_text.map(str::to_owned),
    })
}

impl CompiledSchedule {
    /// Whether `now` lies inside a window, and when that window ends.
    ///
    /// Outside a window this only answers `(false, None)`; the upcoming
    /// window comes from [`Self::next_window`] (cron) or [`Self::next_start`]
    /// (both kinds), evaluated at the same `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> (bool, Option<DateTime<Utc>>) {
        match self {
            CompiledSchedule::Time(time) => {
                let start = time.start_at.with_timezone(&Utc);
                let finish = time.finish_at.with_timezone(&Utc);
                if start < now && now < finish {
                    (true, Some(finish))
                } else {
                    (false, None)
                }
            }
            CompiledSchedule::Cron(cron) => match cron.current_window(now) {
                Some(window) => (true, Some(window.end)),
                None => (false, None),
            },
        }
    }

    /// The first cron window starting at or after `from`. Time schedules have
    /// a single fixed window and return `None`.
    pub fn next_window(&self, from: DateTime<Utc>) -> Option<Window> {
        match self {
            CompiledSchedule::Time(_) => None,
            CompiledSchedule::Cron(cron) => cron.next_window(from),
        }
    }

    /// When the reconciler should look again while no window is active.
    pub fn next_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CompiledSchedule::Time(time) => {
                let start = time.start_at.with_timezone(&Utc);
                (now <= start).then_some(start)
            }
            CompiledSchedule::Cron(cron) => cron.next_window(now).map(|w| w.start),
        }
    }

    /// A time schedule whose window has closed for good. Cron never finishes.
    pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
        match self {
            CompiledSchedule::Time(time) => time.finish_at.with_timezone(&Utc) <= now,
            CompiledSchedule::Cron(_) => false,
        }
    }

    /// Renders the compiled schedule back into its resource form.
    pub fn to_spec(&self) -> Schedule {
        match self {
            CompiledSchedule::Time(time) => Schedule {
                type_: TYPE_TIME.to_owned(),
                start_at: Some(time.start_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                finish_at: Some(time.finish_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                ..Default::default()
            },
            CompiledSchedule::Cron(cron) => Schedule {
                type_: TYPE_CRON.to_owned(),
                cron_expression: Some(cron.expression.clone()),
                duration: Some(cron.duration_text.clone()),
                time_zone: cron.zone_text.clone(),
                ..Default::default()
            },
        }
    }
}

impl CronSchedule {
    pub fn duration(&self) -> TimeDelta {
        self.duration
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    fn current_window(&self, now: DateTime<Utc>) -> Option<Window> {
        let start = self.schedule.latest_start(self.zone, now)?;
        let end = start + self.duration;
        (now < end).then_some(Window { start, end })
    }

    fn next_window(&self, from: DateTime<Utc>) -> Option<Window> {
        let start = self.schedule.first_start_from(self.zone, from)?;
        Some(Window {
            start,
            end: start + self.duration,
        })
    }
}
