// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

#![recursion_limit = "256"]

use anyhow::Context;
use clap::Parser;
use idaas_broker::application::Application;
use idaas_broker::commands;
use idaas_broker::configuration::BrokerOptions;
use idaas_broker::http::unsafe_debug_enabled;
use tracing_subscriber::EnvFilter;

fn init_tracing(json_logs: bool) {
    let default_filter = if unsafe_debug_enabled() { "debug" } else { "warn" };
    let filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );

    // stdout only carries credential output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json_logs {
        builder
            .json()
            // this needs to be set to remove duplicated information in the log.
            .with_current_span(false)
            .with_ansi(false)
            .init();
    } else {
        builder.without_time().init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let options = BrokerOptions::parse();
    init_tracing(options.json_logs);

    tracing::debug!("[broker] {:?}", &options);

    let application = Application::build(&options).context("failed to initialize")?;
    let config_file = options.config_file()?;

    let code = commands::run(
        &application,
        &config_file,
        &options.command,
        &mut std::io::stdout(),
    )
    .await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
