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

use crate::utils::tls;
use crate::webhook::{VALIDATE_PATH, validate_handler};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum_server::tls_rustls::RustlsConfig;
use snafu::{ResultExt, Snafu};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("read {} error: {}", path.display(), source))]
    ReadPem { path: PathBuf, source: std::io::Error },

    #[snafu(transparent)]
    Tls { source: tls::Error },

    #[snafu(display("TLS certificate and key must be configured together"))]
    IncompleteTls,

    #[snafu(display("bind {} error: {}", addr, source))]
    Bind { addr: SocketAddr, source: std::io::Error },

    #[snafu(display("webhook server error: {}", source))]
    Serve { source: std::io::Error },
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub port: u16,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

pub fn router() -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_handler))
        .route("/healthz", get(health_check))
        .route("/readyz", get(ready_check))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(config: WebhookConfig) -> Result<(), Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let (cert_file, key_file) = match (config.cert_file, config.key_file) {
        (Some(cert), Some(key)) => (cert, key),
        (None, None) => {
            warn!("no TLS certificate configured, webhook serving plain HTTP on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .context(BindSnafu { addr })?;
            return axum::serve(listener, router()).await.context(ServeSnafu);
        }
        _ => return IncompleteTlsSnafu.fail(),
    };

    let cert_pem = tokio::fs::read(&cert_file)
        .await
        .context(ReadPemSnafu { path: &cert_file })?;
    let key_pem = tokio::fs::read(&key_file)
        .await
        .context(ReadPemSnafu { path: &key_file })?;
    let server_config = tls::server_config(&cert_pem, &key_pem)?;

    info!("admission webhook listening on https://{}{}", addr, VALIDATE_PATH);

    axum_server::bind_rustls(addr, RustlsConfig::from_config(Arc::new(server_config)))
        .serve(router().into_make_service())
        .await
        .context(ServeSnafu)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ready_check() -> impl IntoResponse {
    (StatusCode::OK, "Ready")
}
