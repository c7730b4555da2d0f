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

use crate::types;
use crate::types::error::{NoNamespaceSnafu, NoUidSnafu};
use crate::types::v1alpha1::status::Phase;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, KubeSchema, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;

/// Finalizer that keeps the object around until its override is reverted.
pub const CLEANUP_FINALIZER: &str = "autoscaling.mercari.com/scheduledscaling-cleanup";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[kube(
    group = "autoscaling.mercari.com",
    version = "v1alpha1",
    kind = "ScheduledScaling",
    namespaced,
    status = "crate::types::v1alpha1::status::ScheduledScalingStatus",
    shortname = "ss",
    plural = "scheduledscalings",
    singular = "scheduledscaling",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Start Time", "type":"string", "jsonPath":".spec.schedule.startAt"}"#,
    printcolumn = r#"{"name":"End Time", "type":"string", "jsonPath":".spec.schedule.finishAt"}"#,
    printcolumn = r#"{"name":"Target", "type":"string", "jsonPath":".spec.targetRefs.tortoiseName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledScalingSpec {
    pub schedule: Schedule,

    pub target_refs: TargetRefs,

    pub strategy: Strategy,
}

/// Wire form of a schedule. `type` selects which of the remaining fields apply;
/// `crate::schedule::compile` turns it into a closed variant.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Either `time` or `cron`.
    #[serde(rename = "type")]
    pub type_: String,

    /// RFC3339 timestamp, time schedules only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,

    /// RFC3339 timestamp, time schedules only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_at: Option<String>,

    /// Five-field cron expression (minute hour day-of-month month day-of-week).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,

    /// How long each cron window lasts, e.g. `8h` or `1h30m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// IANA zone the cron expression is evaluated in. Defaults to Asia/Tokyo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetRefs {
    #[x_kube(validation = Rule::new("self.size() > 0").message("tortoiseName must be set"))]
    pub tortoise_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_: Option<StaticStrategy>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_min_replicas: Option<i32>,

    /// Pod-wide floor, applied to every resource policy of the tortoise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_allocated_resources: Option<ResourceFloor>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_min_allocated_resources: Vec<ContainerResourceFloor>,
}

impl StaticStrategy {
    pub fn is_empty(&self) -> bool {
        self.minimum_min_replicas.is_none()
            && self.min_allocated_resources.is_none()
            && self.container_min_allocated_resources.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFloor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceFloor {
    /// The floor as a resource list keyed by `cpu` / `memory`.
    pub fn to_resource_list(&self) -> BTreeMap<String, Quantity> {
        let mut list = BTreeMap::new();
        if let Some(cpu) = &self.cpu {
            list.insert("cpu".to_owned(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &self.memory {
            list.insert("memory".to_owned(), Quantity(memory.clone()));
        }
        list
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResourceFloor {
    pub container_name: String,

    pub resource: ResourceFloor,
}

impl ScheduledScaling {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn uid(&self) -> Result<String, types::error::Error> {
        ResourceExt::uid(self).context(NoUidSnafu { name: self.name() })
    }

    pub fn tortoise_name(&self) -> &str {
        &self.spec.target_refs.tortoise_name
    }

    pub fn static_strategy(&self) -> Option<&StaticStrategy> {
        self.spec.strategy.static_.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.status
            .as_ref()
            .map(|status| status.phase.clone())
            .unwrap_or_default()
    }

    pub fn has_cleanup_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == CLEANUP_FINALIZER)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::ScheduledScaling;
    use kube::CustomResourceExt;

    #[test]
    fn test_crd_declares_printer_columns() {
        let crd = ScheduledScaling::crd();
        let version = &crd.spec.versions[0];
        let columns: Vec<_> = version
            .additional_printer_columns
            .as_ref()
            .expect("CRD should declare printer columns")
            .iter()
            .map(|c| c.name.as_str())
            .collect();

        assert_eq!(
            columns,
            vec!["Status", "Start Time", "End Time", "Target", "Age"]
        );
        assert_eq!(crd.spec.group, "autoscaling.mercari.com");
        assert_eq!(crd.spec.names.plural, "scheduledscalings");
    }

    #[test]
    fn test_spec_uses_wire_field_names() {
        let ss = crate::tests::cron_scheduled_scaling("0 9 * * 1-5", "8h", Some("Asia/Tokyo"));
        let value = serde_json::to_value(&ss.spec).unwrap();

        assert_eq!(value["schedule"]["type"], "cron");
        assert_eq!(value["schedule"]["cronExpression"], "0 9 * * 1-5");
        assert_eq!(value["targetRefs"]["tortoiseName"], "test-tortoise");
        assert_eq!(value["strategy"]["static"]["minimumMinReplicas"], 5);
    }
}
