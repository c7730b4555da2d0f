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

use crate::clock::Clock;
use crate::store::ObjectStore;
use crate::types;
use crate::types::v1alpha1::scheduled_scaling::ScheduledScaling;
use crate::types::v1alpha1::status::{Reason, ScheduledScalingStatus};
use crate::types::v1beta3::tortoise::Tortoise;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt};
use serde_json::{Value, json};
use snafu::Snafu;
use snafu::futures::TryFutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const CONTROLLER_NAME: &str = "scheduled-scaling-operator";

/// Upper bound for a single API round trip.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("{} '{}' was modified concurrently", kind, name))]
    Conflict { kind: &'static str, name: String },

    #[snafu(display("{} '{}' not found", kind, name))]
    NotFound { kind: &'static str, name: String },

    #[snafu(display("Kubernetes API call timed out after {:?}", timeout))]
    Timeout { timeout: Duration },

    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub struct Context {
    pub(crate) client: kube::Client,
    pub(crate) recorder: Recorder,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Context {
    pub fn new(client: kube::Client, clock: Arc<dyn Clock>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.into(),
            instance: std::env::var("HOSTNAME").ok(),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            recorder,
            clock,
        }
    }

    fn tortoises(&self, namespace: &str) -> Api<Tortoise> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn scheduled_scalings(&self, namespace: &str) -> Api<ScheduledScaling> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn bounded<T, F>(call: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::time::timeout(API_TIMEOUT, call)
        .await
        .unwrap_or(Err(Error::Timeout {
            timeout: API_TIMEOUT,
        }))
}

/// Folds 404 and 409 responses into the typed variants callers branch on.
fn classify(source: kube::Error, kind: &'static str, name: &str) -> Error {
    match source {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
            kind,
            name: name.to_owned(),
        },
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind,
            name: name.to_owned(),
        },
        source => Error::Kube { source },
    }
}

impl ObjectStore for Context {
    async fn get_scheduled_scaling(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ScheduledScaling>, Error> {
        let api = self.scheduled_scalings(namespace);
        bounded(api.get_opt(name).context(KubeSnafu)).await
    }

    async fn get_tortoise(&self, namespace: &str, name: &str) -> Result<Option<Tortoise>, Error> {
        let api = self.tortoises(namespace);
        bounded(api.get_opt(name).context(KubeSnafu)).await
    }

    async fn patch_tortoise(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Tortoise, Error> {
        let api = self.tortoises(namespace);
        bounded(async {
            api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
                .await
                .map_err(|e| classify(e, "Tortoise", name))
        })
        .await
    }

    async fn patch_status(
        &self,
        resource: &ScheduledScaling,
        status: &ScheduledScalingStatus,
    ) -> Result<(), Error> {
        let api = self.scheduled_scalings(&resource.namespace()?);
        let name = resource.name();
        let body = json!({ "status": status });

        bounded(async {
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&body))
                .await
                .map(|_| ())
                .map_err(|e| classify(e, "ScheduledScaling", &name))
        })
        .await
    }

    async fn set_finalizers(
        &self,
        resource: &ScheduledScaling,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api = self.scheduled_scalings(&resource.namespace()?);
        let name = resource.name();
        let body = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": resource.resource_version(),
            }
        });

        bounded(async {
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&body))
                .await
                .map(|_| ())
                .map_err(|e| classify(e, "ScheduledScaling", &name))
        })
        .await
    }

    async fn record(
        &self,
        resource: &ScheduledScaling,
        event_type: EventType,
        reason: Reason,
        message: &str,
    ) -> Result<(), Error> {
        bounded(
            self.recorder
                .publish(
                    &Event {
                        type_: event_type,
                        reason: reason.to_string(),
                        note: Some(message.into()),
                        action: "Reconcile".into(),
                        secondary: None,
                    },
                    &resource.object_ref(&()),
                )
                .context(RecordSnafu),
        )
        .await
    }
}
