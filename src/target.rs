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

use crate::overrides;
use crate::store::ObjectStore;
use crate::types::v1alpha1::scheduled_scaling::ScheduledScaling;
use crate::types::v1beta3::tortoise::Tortoise;
use crate::{context, types};
use chrono::{DateTime, Utc};
use snafu::{OptionExt, Snafu};
use tracing::{debug, info, warn};

/// Attempts per apply or revert before a version conflict is surfaced.
pub const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("tortoise {}/{} not found", namespace, name))]
    TargetNotFound { namespace: String, name: String },

    #[snafu(display(
        "failed to apply override to tortoise {} after {} conflicting attempts",
        name,
        attempts
    ))]
    PatchConflict { name: String, attempts: usize },

    #[snafu(display(
        "failed to revert override on tortoise {} after {} conflicting attempts",
        name,
        attempts
    ))]
    RevertConflict { name: String, attempts: usize },

    #[snafu(transparent)]
    Overrides { source: overrides::Error },

    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::TargetNotFound { .. } => true,
            Error::Context { source } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Error::PatchConflict { .. } | Error::RevertConflict { .. } => true,
            Error::Context { source } => source.is_conflict(),
            _ => false,
        }
    }

    /// The target is held by someone else, or its snapshot cannot be trusted.
    pub fn is_overridden(&self) -> bool {
        matches!(
            self,
            Error::Overrides {
                source: overrides::Error::Overridden { .. } | overrides::Error::BadSnapshot { .. }
            }
        )
    }
}

#[derive(Debug)]
pub struct Applied {
    pub tortoise: Tortoise,
    /// Whether this call changed the tortoise.
    pub changed: bool,
    pub warning: Option<String>,
    pub min_replicas: Option<i32>,
}

pub async fn apply_override<S: ObjectStore>(
    store: &S,
    resource: &ScheduledScaling,
    now: DateTime<Utc>,
) -> Result<Applied, Error> {
    let namespace = resource.namespace()?;
    let name = resource.tortoise_name();

    for attempt in 1..=MAX_ATTEMPTS {
        let tortoise = store
            .get_tortoise(&namespace, name)
            .await?
            .context(TargetNotFoundSnafu { namespace: &namespace, name })?;

        let plan = overrides::plan_apply(&tortoise, resource, now)?;
        let Some(patch) = plan.patch else {
            return Ok(Applied {
                tortoise,
                changed: false,
                warning: plan.warning,
                min_replicas: plan.min_replicas,
            });
        };

        match store.patch_tortoise(&namespace, name, &patch).await {
            Ok(tortoise) => {
                info!(tortoise = name, %namespace, min_replicas = ?plan.min_replicas, "override applied");
                return Ok(Applied {
                    tortoise,
                    changed: true,
                    warning: plan.warning,
                    min_replicas: plan.min_replicas,
                });
            }
            Err(e) if e.is_conflict() => {
                debug!(tortoise = name, attempt, "tortoise changed underneath, retrying apply");
            }
            Err(e) if e.is_not_found() => {
                return TargetNotFoundSnafu { namespace, name }.fail();
            }
            Err(e) => return Err(e.into()),
        }
    }

    PatchConflictSnafu {
        name,
        attempts: MAX_ATTEMPTS,
    }
    .fail()
}

/// Restores the tortoise if `resource` owns its override. Returns whether a
/// patch was sent; a missing tortoise is reported as [`Error::TargetNotFound`].
pub async fn revert_override<S: ObjectStore>(
    store: &S,
    resource: &ScheduledScaling,
) -> Result<bool, Error> {
    let namespace = resource.namespace()?;
    let uid = resource.uid()?;
    let name = resource.tortoise_name();

    for attempt in 1..=MAX_ATTEMPTS {
        let tortoise = store
            .get_tortoise(&namespace, name)
            .await?
            .context(TargetNotFoundSnafu { namespace: &namespace, name })?;

        let patch = match overrides::plan_revert(&tortoise, &uid) {
            Ok(Some(patch)) => patch,
            Ok(None) => {
                debug!(tortoise = name, "no override owned by this object, nothing to revert");
                return Ok(false);
            }
            Err(e) => {
                warn!(tortoise = name, "leaving tortoise untouched: {}", e);
                return Ok(false);
            }
        };

        match store.patch_tortoise(&namespace, name, &patch).await {
            Ok(_) => {
                info!(tortoise = name, %namespace, "override reverted");
                return Ok(true);
            }
            Err(e) if e.is_conflict() => {
                debug!(tortoise = name, attempt, "tortoise changed underneath, retrying revert");
            }
            Err(e) if e.is_not_found() => {
                return TargetNotFoundSnafu { namespace, name }.fail();
            }
            Err(e) => return Err(e.into()),
        }
    }

    RevertConflictSnafu {
        name,
        attempts: MAX_ATTEMPTS,
    }
    .fail()
}
