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

use crate::context::Context;
use crate::reconcile::Error;
use crate::types::v1alpha1::scheduled_scaling::ScheduledScaling;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

pub const CONFLICT_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

pub fn error_policy(object: Arc<ScheduledScaling>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(name = %object.name(), "error_policy: {:?}", error);

    match backoff(error) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

/// How long to wait before retrying after `error`. `None` means only a change
/// to a watched object is worth another pass.
pub fn backoff(error: &Error) -> Option<Duration> {
    if error.is_not_found() {
        None
    } else if error.is_conflict() {
        Some(CONFLICT_BACKOFF)
    } else {
        Some(DEFAULT_BACKOFF)
    }
}
