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

//! Override bookkeeping on the target tortoise.
//!
//! Before the first override a snapshot of everything it will touch is
//! written to [`ORIGINAL_SPEC_ANNOTATION`], together with the owning
//! scheduled scaling. The annotation is the only record of ownership: an
//! apply by anyone else is refused and a revert by anyone else is a no-op.
//! Planning is pure; `crate::target` sends the resulting merge patches.

use crate::types;
use crate::types::v1alpha1::scheduled_scaling::{ScheduledScaling, StaticStrategy};
use crate::types::v1beta3::tortoise::{ContainerResourcePolicy, ResourceList, Tortoise};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;

pub const ORIGINAL_SPEC_ANNOTATION: &str = "autoscaling.mercari.com/scheduledscaling-original-spec";
pub const MIN_REPLICAS_ANNOTATION: &str = "autoscaling.mercari.com/scheduledscaling-min-replicas";

const SNAPSHOT_PREFIX: &str = "v1:";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "tortoise {} is already overridden by ScheduledScaling {}/{}",
        tortoise,
        owner.namespace,
        owner.name
    ))]
    Overridden { tortoise: String, owner: Owner },

    #[snafu(display("unreadable {} annotation on tortoise {}: {}", ORIGINAL_SPEC_ANNOTATION, tortoise, message))]
    BadSnapshot { tortoise: String, message: String },

    #[snafu(display("encode snapshot error: {}", source))]
    Encode { source: serde_json::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

/// The scheduled scaling an override belongs to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

// Field order is alphabetical so the encoded form has sorted keys.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginalSpec {
    pub containers: BTreeMap<String, ContainerSnapshot>,
    pub min_replicas: Option<i32>,
    pub owner: Option<Owner>,
    pub update_mode: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSnapshot {
    /// Whether the resource policy entry was there before the override.
    pub existed: bool,
    pub min_allocated_resources: Option<ResourceList>,
}

impl OriginalSpec {
    pub fn encode(&self) -> Result<String, Error> {
        let body = serde_json::to_string(self).context(EncodeSnafu)?;
        Ok(format!("{SNAPSHOT_PREFIX}{body}"))
    }

    pub fn decode(text: &str) -> Result<Self, String> {
        let body = text
            .strip_prefix(SNAPSHOT_PREFIX)
            .ok_or_else(|| format!("missing '{SNAPSHOT_PREFIX}' version prefix"))?;
        serde_json::from_str(body).map_err(|e| e.to_string())
    }

    fn owned_by(&self, uid: &str) -> bool {
        self.owner.as_ref().is_some_and(|owner| owner.uid == uid)
    }
}

/// Outcome of planning an override.
#[derive(Clone, Debug, PartialEq)]
pub struct ApplyPlan {
    /// `None` when the tortoise already carries exactly this override.
    pub patch: Option<Value>,
    /// Set when the recommender asks for more replicas than the strategy.
    pub warning: Option<String>,
    /// The minimum replicas the tortoise ends up with, if the strategy sets one.
    pub min_replicas: Option<i32>,
}

fn snapshot_of(tortoise: &Tortoise) -> Option<Result<OriginalSpec, String>> {
    tortoise
        .annotations()
        .get(ORIGINAL_SPEC_ANNOTATION)
        .map(|text| OriginalSpec::decode(text))
}

/// The scheduled scaling currently holding an override on `tortoise`.
pub fn owner_of(tortoise: &Tortoise) -> Option<Owner> {
    snapshot_of(tortoise)?.ok()?.owner
}

pub fn hpa_warning(requested: i32, recommended: i32) -> String {
    format!(
        "Requested minReplicas ({requested}) is lower than HPA's current recommendation ({recommended}) for the workload. Using HPA recommendation ({recommended}) instead to prevent performance issues. Consider reviewing your scaling strategy."
    )
}

/// Containers whose resource policy the strategy writes to.
fn touched_containers(tortoise: &Tortoise, strategy: &StaticStrategy) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    if strategy.min_allocated_resources.is_some() {
        names.extend(tortoise.spec.resource_policy.iter().map(|p| p.container_name.clone()));
    }
    for floor in &strategy.container_min_allocated_resources {
        if !names.contains(&floor.container_name) {
            names.push(floor.container_name.clone());
        }
    }
    names
}

fn raise_floor(policy: &mut ContainerResourcePolicy, floor: &ResourceList) {
    let resources = policy.min_allocated_resources.get_or_insert_with(BTreeMap::new);
    for (key, quantity) in floor {
        resources.insert(key.clone(), quantity.clone());
    }
}

fn desired_resource_policy(
    current: &[ContainerResourcePolicy],
    strategy: &StaticStrategy,
) -> Vec<ContainerResourcePolicy> {
    let mut policies = current.to_vec();

    if let Some(floor) = &strategy.min_allocated_resources {
        let floor = floor.to_resource_list();
        for policy in &mut policies {
            raise_floor(policy, &floor);
        }
    }

    for container in &strategy.container_min_allocated_resources {
        let floor = container.resource.to_resource_list();
        match policies
            .iter_mut()
            .find(|p| p.container_name == container.container_name)
        {
            Some(policy) => raise_floor(policy, &floor),
            None => policies.push(ContainerResourcePolicy {
                container_name: container.container_name.clone(),
                min_allocated_resources: Some(floor),
                ..Default::default()
            }),
        }
    }

    policies
}

/// Plans the merge patch that puts `resource`'s override on `tortoise`.
///
/// On a tortoise this object already overrides, the stored snapshot is kept
/// as is, so a repeated apply converges to the same annotations.
pub fn plan_apply(
    tortoise: &Tortoise,
    resource: &ScheduledScaling,
    now: DateTime<Utc>,
) -> Result<ApplyPlan, Error> {
    let owner = Owner {
        name: resource.name(),
        namespace: resource.namespace()?,
        uid: resource.uid()?,
    };
    let strategy = resource.static_strategy().cloned().unwrap_or_default();
    let tortoise_name = tortoise.name_any();
    let annotations = tortoise.annotations();

    let (mut snapshot, reused) = match snapshot_of(tortoise) {
        Some(Err(message)) => {
            return BadSnapshotSnafu {
                tortoise: tortoise_name,
                message,
            }
            .fail();
        }
        Some(Ok(existing)) if !existing.owned_by(&owner.uid) => {
            return match existing.owner {
                Some(other) => OverriddenSnafu {
                    tortoise: tortoise_name,
                    owner: other,
                }
                .fail(),
                None => BadSnapshotSnafu {
                    tortoise: tortoise_name,
                    message: "snapshot has no owner",
                }
                .fail(),
            };
        }
        Some(Ok(existing)) => (existing, true),
        None => (
            OriginalSpec {
                containers: BTreeMap::new(),
                min_replicas: tortoise.spec.min_replicas,
                owner: Some(owner),
                update_mode: tortoise.spec.update_mode.clone(),
            },
            false,
        ),
    };

    // entries first seen now are recorded with their current values
    for name in touched_containers(tortoise, &strategy) {
        snapshot.containers.entry(name.clone()).or_insert_with(|| {
            let current = tortoise.resource_policy(&name);
            ContainerSnapshot {
                existed: current.is_some(),
                min_allocated_resources: current.and_then(|p| p.min_allocated_resources.clone()),
            }
        });
    }

    let recommended = tortoise.recommended_min_replicas(now);
    let prior_min_replicas = match annotations.get(MIN_REPLICAS_ANNOTATION) {
        Some(value) if reused => value.clone(),
        _ => snapshot
            .min_replicas
            .or(recommended)
            .unwrap_or(1)
            .to_string(),
    };

    let mut warning = None;
    let min_replicas = strategy.minimum_min_replicas.map(|requested| match recommended {
        Some(h) if h > requested => {
            warning = Some(hpa_warning(requested, h));
            h
        }
        _ => requested,
    });

    let encoded = snapshot.encode()?;
    let mut spec = Map::new();
    let mut changed = annotations.get(ORIGINAL_SPEC_ANNOTATION) != Some(&encoded)
        || annotations.get(MIN_REPLICAS_ANNOTATION) != Some(&prior_min_replicas);

    if let Some(min) = min_replicas {
        changed |= tortoise.spec.min_replicas != Some(min);
        spec.insert("minReplicas".to_owned(), json!(min));
    }

    if !snapshot.containers.is_empty() {
        let policies = desired_resource_policy(&tortoise.spec.resource_policy, &strategy);
        changed |= policies != tortoise.spec.resource_policy;
        spec.insert(
            "resourcePolicy".to_owned(),
            serde_json::to_value(&policies).context(EncodeSnafu)?,
        );
    }

    let patch = changed.then(|| {
        json!({
            "metadata": {
                "resourceVersion": tortoise.resource_version(),
                "annotations": {
                    ORIGINAL_SPEC_ANNOTATION: encoded,
                    MIN_REPLICAS_ANNOTATION: prior_min_replicas,
                },
            },
            "spec": spec,
        })
    });

    Ok(ApplyPlan {
        patch,
        warning,
        min_replicas,
    })
}

/// Plans the merge patch that restores `tortoise` from the snapshot owned by
/// `uid`. `Ok(None)` when there is nothing of ours to revert.
pub fn plan_revert(tortoise: &Tortoise, uid: &str) -> Result<Option<Value>, Error> {
    let snapshot = match snapshot_of(tortoise) {
        None => return Ok(None),
        Some(Err(message)) => {
            return BadSnapshotSnafu {
                tortoise: tortoise.name_any(),
                message,
            }
            .fail();
        }
        Some(Ok(snapshot)) if !snapshot.owned_by(uid) => return Ok(None),
        Some(Ok(snapshot)) => snapshot,
    };

    let mut spec = Map::new();
    spec.insert("updateMode".to_owned(), json!(snapshot.update_mode));
    spec.insert("minReplicas".to_owned(), json!(snapshot.min_replicas));

    if !snapshot.containers.is_empty() {
        let policies: Vec<ContainerResourcePolicy> = tortoise
            .spec
            .resource_policy
            .iter()
            .filter_map(|policy| match snapshot.containers.get(&policy.container_name) {
                None => Some(policy.clone()),
                Some(saved) if !saved.existed => None,
                Some(saved) => Some(ContainerResourcePolicy {
                    min_allocated_resources: saved.min_allocated_resources.clone(),
                    ..policy.clone()
                }),
            })
            .collect();

        let policies = if policies.is_empty() {
            Value::Null
        } else {
            serde_json::to_value(&policies).context(EncodeSnafu)?
        };
        spec.insert("resourcePolicy".to_owned(), policies);
    }

    Ok(Some(json!({
        "metadata": {
            "resourceVersion": tortoise.resource_version(),
            "annotations": {
                ORIGINAL_SPEC_ANNOTATION: null,
                MIN_REPLICAS_ANNOTATION: null,
            },
        },
        "spec": spec,
    })))
}
