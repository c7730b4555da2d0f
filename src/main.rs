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

use clap::{Parser, Subcommand};
use scheduled_scaling_operator::webhook::server::WebhookConfig;
use scheduled_scaling_operator::{crd, run};
use shadow_rs::shadow;
use std::path::PathBuf;

shadow!(build);

#[derive(Parser)]
#[command(name = "scheduled-scaling-op")]
#[command(version = build::PKG_VERSION)]
#[command(about = "Scheduled scaling operator for Tortoise autoscalers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Output CRDs in YAML
    Crd {
        /// Optional output path. If not set, the output will be written to stdout.
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Run the controller and the admission webhook
    Server {
        /// Port the admission webhook listens on
        #[arg(long, env = "WEBHOOK_PORT", default_value_t = 9443)]
        webhook_port: u16,

        /// PEM certificate for the webhook. Plain HTTP is served when unset.
        #[arg(long, env = "TLS_CERT_FILE", requires = "tls_key_file")]
        tls_cert_file: Option<PathBuf>,

        /// PEM private key matching --tls-cert-file
        #[arg(long, env = "TLS_KEY_FILE", requires = "tls_cert_file")]
        tls_key_file: Option<PathBuf>,

        /// Run the controller only
        #[arg(long, env = "DISABLE_WEBHOOK")]
        no_webhook: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crd { file } => crd(file).await?,
        Commands::Server {
            webhook_port,
            tls_cert_file,
            tls_key_file,
            no_webhook,
        } => {
            let webhook = (!no_webhook).then_some(WebhookConfig {
                port: webhook_port,
                cert_file: tls_cert_file,
                key_file: tls_key_file,
            });
            run(webhook).await?
        }
    }

    Ok(())
}
