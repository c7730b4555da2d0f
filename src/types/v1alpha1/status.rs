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

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledScalingStatus {
    #[serde(default)]
    pub phase: Phase,

    /// RFC3339 time of the last phase change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation of the spec the phase was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Lifecycle of a scheduled scaling.
/// - Pending: waiting for the next window, or blocked on the target
/// - Active: the override is applied to the target tortoise
/// - Completed: a time schedule whose window has passed
/// - Failed: invalid spec or lost target, revisited only on spec change
#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, Display, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
#[schemars(rename_all = "PascalCase")]
pub enum Phase {
    #[strum(to_string = "Pending")]
    #[default]
    Pending,

    #[strum(to_string = "Active")]
    Active,

    #[strum(to_string = "Completed")]
    Completed,

    #[strum(to_string = "Failed")]
    Failed,
}

/// Machine readable `status.reason` values, also used as event reasons.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Reason {
    #[strum(to_string = "Scheduled")]
    Scheduled,

    #[strum(to_string = "OverrideApplied")]
    OverrideApplied,

    #[strum(to_string = "OverrideReverted")]
    OverrideReverted,

    #[strum(to_string = "HPARecommendationHigher")]
    HpaRecommendationHigher,

    #[strum(to_string = "Completed")]
    Completed,

    #[strum(to_string = "TargetMissing")]
    TargetMissing,

    #[strum(to_string = "TargetLost")]
    TargetLost,

    #[strum(to_string = "Conflict")]
    Conflict,

    #[strum(to_string = "InvalidSpec")]
    InvalidSpec,

    #[strum(to_string = "RevertConflict")]
    RevertConflict,
}
