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

//! The API surface the reconciler needs, kept narrow so it can run against
//! an in-memory store in tests.

use crate::context::Error;
use crate::types::v1alpha1::scheduled_scaling::ScheduledScaling;
use crate::types::v1alpha1::status::{Reason, ScheduledScalingStatus};
use crate::types::v1beta3::tortoise::Tortoise;
use kube::runtime::events::EventType;
use serde_json::Value;
use std::future::Future;

pub trait ObjectStore: Send + Sync {
    fn get_scheduled_scaling(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<ScheduledScaling>, Error>> + Send;

    fn get_tortoise(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Tortoise>, Error>> + Send;

    /// JSON merge patch. A `metadata.resourceVersion` in the patch makes the
    /// write conditional and a stale version fails with [`Error::Conflict`].
    fn patch_tortoise(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> impl Future<Output = Result<Tortoise, Error>> + Send;

    fn patch_status(
        &self,
        resource: &ScheduledScaling,
        status: &ScheduledScalingStatus,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn set_finalizers(
        &self,
        resource: &ScheduledScaling,
        finalizers: Vec<String>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn record(
        &self,
        resource: &ScheduledScaling,
        event_type: EventType,
        reason: Reason,
        message: &str,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
