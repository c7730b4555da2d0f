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

//! The slice of the Tortoise resource this operator reads and overrides.
//!
//! Tortoise is owned by the autoscaler; only the fields scheduled scaling
//! touches are typed here and everything else is carried through `extra` so a
//! round trip never drops data written by other controllers.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type ResourceList = BTreeMap<String, Quantity>;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "autoscaling.mercari.com",
    version = "v1beta3",
    kind = "Tortoise",
    namespaced,
    status = "TortoiseStatus",
    schema = "disabled",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct TortoiseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<String>,

    /// Floor the recommender must respect for the horizontal minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_policy: Vec<ContainerResourcePolicy>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResourcePolicy {
    pub container_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_allocated_resources: Option<ResourceList>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TortoiseStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Recommendations>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<HorizontalRecommendations>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalRecommendations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub min_replicas: Vec<ReplicasRecommendation>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One slot of the recommender's per-hour replica recommendation.
/// `from` is inclusive and `to` exclusive, both hours of the day in UTC.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicasRecommendation {
    pub from: i32,

    pub to: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<String>,

    pub value: i32,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ReplicasRecommendation {
    fn covers(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour() as i32;
        if hour < self.from || hour >= self.to {
            return false;
        }

        match &self.weekday {
            None => true,
            Some(day) => weekday_matches(day, at.weekday()),
        }
    }
}

fn weekday_matches(day: &str, weekday: Weekday) -> bool {
    let full = match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    };
    day.eq_ignore_ascii_case(full) || day.eq_ignore_ascii_case(&full[..3])
}

impl Tortoise {
    /// The minimum replicas the recommender currently asks for, if any slot
    /// covers `now`. Overlapping slots resolve to the highest value.
    pub fn recommended_min_replicas(&self, now: DateTime<Utc>) -> Option<i32> {
        self.status
            .as_ref()?
            .recommendations
            .as_ref()?
            .horizontal
            .as_ref()?
            .min_replicas
            .iter()
            .filter(|r| r.covers(now))
            .map(|r| r.value)
            .max()
    }

    pub fn resource_policy(&self, container_name: &str) -> Option<&ContainerResourcePolicy> {
        self.spec
            .resource_policy
            .iter()
            .find(|p| p.container_name == container_name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::Tortoise;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "apiVersion": "autoscaling.mercari.com/v1beta3",
            "kind": "Tortoise",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {
                "updateMode": "Auto",
                "targetRefs": {"scaleTargetRef": {"kind": "Deployment", "name": "web"}},
                "resourcePolicy": [{
                    "containerName": "app",
                    "minAllocatedResources": {"cpu": "100m"},
                    "maxAllocatedResources": {"cpu": "4"}
                }]
            },
            "status": {"tortoisePhase": "Working"}
        });

        let tortoise: Tortoise = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(tortoise.spec.update_mode.as_deref(), Some("Auto"));
        assert!(tortoise.spec.extra.contains_key("targetRefs"));

        let back = serde_json::to_value(&tortoise).unwrap();
        assert_eq!(back["spec"], raw["spec"]);
        assert_eq!(back["status"], raw["status"]);
    }

    #[test]
    fn test_recommendation_picks_slot_covering_now() {
        let tortoise = crate::tests::tortoise_with_recommendation(3);

        assert_eq!(
            tortoise.recommended_min_replicas(at("2024-01-16T03:00:00Z")),
            Some(3)
        );
        assert_eq!(
            tortoise.recommended_min_replicas(at("2024-01-16T15:00:00Z")),
            Some(4)
        );
        // 2024-01-15 is a Monday, the weekday slot wins over the plain one
        assert_eq!(
            tortoise.recommended_min_replicas(at("2024-01-15T09:30:00Z")),
            Some(8)
        );
    }

    #[test]
    fn test_recommendation_absent_without_status() {
        let tortoise = crate::tests::create_test_tortoise();
        assert_eq!(
            tortoise.recommended_min_replicas(at("2024-01-16T03:00:00Z")),
            None
        );
    }
}
