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

//! Semantic checks shared by the admission webhook and the reconciler.

use crate::schedule::{self, CompiledSchedule};
use crate::types;
use crate::types::error::ImmutableFieldModifiedSnafu;
use crate::types::v1alpha1::scheduled_scaling::{ResourceFloor, ScheduledScaling, ScheduledScalingSpec};
use crate::types::v1alpha1::status::Phase;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeSet;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("spec.schedule: {}", source))]
    Schedule { source: schedule::Error },

    #[snafu(display("spec.targetRefs.tortoiseName must not be empty"))]
    EmptyTarget,

    #[snafu(display(
        "spec.strategy.static must set at least one of minimumMinReplicas, minAllocatedResources or containerMinAllocatedResources"
    ))]
    EmptyStrategy,

    #[snafu(display("spec.strategy.static.minimumMinReplicas must be at least 1, got {}", value))]
    MinReplicasTooLow { value: i32 },

    #[snafu(display("{}: '{}' is not a valid resource quantity", field, value))]
    BadQuantity { field: String, value: String },

    #[snafu(display(
        "spec.strategy.static.containerMinAllocatedResources[{}].containerName must not be empty",
        index
    ))]
    EmptyContainerName { index: usize },

    #[snafu(display(
        "spec.strategy.static.containerMinAllocatedResources: container '{}' is listed more than once",
        name
    ))]
    DuplicateContainer { name: String },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

/// Validates a spec and returns its compiled schedule.
pub fn validate_spec(spec: &ScheduledScalingSpec) -> Result<CompiledSchedule, Error> {
    let compiled = schedule::compile(&spec.schedule).context(ScheduleSnafu)?;

    if spec.target_refs.tortoise_name.trim().is_empty() {
        return EmptyTargetSnafu.fail();
    }

    let strategy = match &spec.strategy.static_ {
        Some(strategy) if !strategy.is_empty() => strategy,
        _ => return EmptyStrategySnafu.fail(),
    };

    if let Some(value) = strategy.minimum_min_replicas
        && value < 1
    {
        return MinReplicasTooLowSnafu { value }.fail();
    }

    if let Some(floor) = &strategy.min_allocated_resources {
        check_floor("spec.strategy.static.minAllocatedResources", floor)?;
    }

    let mut seen = BTreeSet::new();
    for (index, container) in strategy.container_min_allocated_resources.iter().enumerate() {
        if container.container_name.trim().is_empty() {
            return EmptyContainerNameSnafu { index }.fail();
        }
        if !seen.insert(container.container_name.as_str()) {
            return DuplicateContainerSnafu {
                name: &container.container_name,
            }
            .fail();
        }
        check_floor(
            &format!("spec.strategy.static.containerMinAllocatedResources[{index}].resource"),
            &container.resource,
        )?;
    }

    Ok(compiled)
}

/// Update rules on top of [`validate_spec`]: the target cannot move while an
/// override is in place.
pub fn validate_update(old: &ScheduledScaling, new: &ScheduledScaling) -> Result<CompiledSchedule, Error> {
    let compiled = validate_spec(&new.spec)?;

    if old.phase() == Phase::Active && old.tortoise_name() != new.tortoise_name() {
        return ImmutableFieldModifiedSnafu {
            name: new.name(),
            field: "spec.targetRefs.tortoiseName",
            message: "the target cannot change while the override is active",
        }
        .fail()
        .map_err(Error::from);
    }

    Ok(compiled)
}

fn check_floor(field: &str, floor: &ResourceFloor) -> Result<(), Error> {
    for (key, value) in [("cpu", &floor.cpu), ("memory", &floor.memory)] {
        if let Some(value) = value
            && !is_quantity(value)
        {
            return BadQuantitySnafu {
                field: format!("{field}.{key}"),
                value,
            }
            .fail();
        }
    }
    Ok(())
}

/// Non-negative Kubernetes quantity: a decimal number with an optional
/// binary (`Ki`..`Ei`), decimal (`n`..`E`) or exponent suffix.
pub fn is_quantity(text: &str) -> bool {
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);

    let valid_number = match number.split_once('.') {
        None => !number.is_empty(),
        Some((whole, fraction)) => {
            !fraction.contains('.') && !(whole.is_empty() && fraction.is_empty())
        }
    };
    if !valid_number {
        return false;
    }

    match suffix {
        "" | "n" | "u" | "m" | "k" | "M" | "G" | "T" | "P" | "E" => true,
        "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" => true,
        _ => {
            let Some(exponent) = suffix.strip_prefix(['e', 'E']) else {
                return false;
            };
            let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
    }
}
