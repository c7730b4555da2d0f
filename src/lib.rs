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

use crate::clock::SystemClock;
use crate::context::Context;
use crate::error_policy::error_policy;
use crate::reconcile::reconcile_scheduled_scaling;
use crate::types::v1alpha1::scheduled_scaling::ScheduledScaling;
use crate::types::v1beta3::tortoise::Tortoise;
use crate::webhook::server::WebhookConfig;
use futures::StreamExt;
use kube::CustomResourceExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher};
use kube::{Api, Client};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod clock;
pub mod context;
pub mod error_policy;
pub mod overrides;
pub mod reconcile;
pub mod schedule;
pub mod store;
pub mod target;
pub mod types;
pub mod utils;
pub mod validation;
pub mod webhook;


/// Runs the controller, and the admission webhook unless `webhook` is `None`,
/// until a termination signal arrives.
pub async fn run(webhook: Option<WebhookConfig>) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let client = Client::try_default().await?;
    let context = Context::new(client.clone(), Arc::new(SystemClock));

    // tortoise edits wake the scheduled scaling recorded as their owner
    let controller = Controller::new(
        Api::<ScheduledScaling>::all(client.clone()),
        watcher::Config::default(),
    )
    .watches(
        Api::<Tortoise>::all(client.clone()),
        watcher::Config::default(),
        |tortoise| {
            overrides::owner_of(&tortoise)
                .map(|owner| ObjectRef::<ScheduledScaling>::new(&owner.name).within(&owner.namespace))
        },
    )
    .shutdown_on_signal()
    .run(reconcile_scheduled_scaling, error_policy, Arc::new(context))
    .for_each(|res| async move {
        match res {
            Ok((object, _)) => info!(
                "reconciled successful, object {}/{}",
                object.namespace.unwrap_or_default(),
                object.name
            ),
            Err(e) => warn!("reconcile failed: {}", e),
        }
    });

    tokio::select! {
        _ = controller => info!("controller stopped"),
        res = serve_webhook(webhook) => res?,
    }

    Ok(())
}

async fn serve_webhook(config: Option<WebhookConfig>) -> Result<(), webhook::server::Error> {
    match config {
        Some(config) => webhook::server::run(config).await,
        None => {
            info!("admission webhook disabled");
            std::future::pending().await
        }
    }
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    writer
        .write_all(serde_yaml_ng::to_string(&ScheduledScaling::crd())?.as_bytes())
        .await?;

    Ok(())
}
