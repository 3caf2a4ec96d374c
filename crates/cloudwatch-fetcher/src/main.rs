// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};
use tracing::{debug, error, info};

use cloudwatch_collector::client::resolve_account_id;
use cloudwatch_collector::config::{log_level_from_env, FileConfig, Settings};
use cloudwatch_collector::fetch::{unix_now, Fetcher};
use cloudwatch_collector::logzio::{LogzioConfig, LogzioShipperFactory};
use cloudwatch_collector::position::PositionStore;
use cloudwatch_collector::scheduler::Scheduler;

mod aws;
mod logger;

use aws::{CloudWatchClientFactory, StsIdentityResolver};

#[tokio::main]
pub async fn main() -> ExitCode {
    if let Err(e) = logger::init(&log_level_from_env()) {
        eprintln!("Failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid environment: {e}");
            return ExitCode::FAILURE;
        }
    };

    let position_store = PositionStore::new(&settings.position_file);
    if settings.reset_positions {
        if let Err(e) = position_store.reset() {
            error!("Failed to reset position file: {e}");
            return ExitCode::FAILURE;
        }
    }

    let config = match FileConfig::from_path(&settings.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;
    let account_id = resolve_account_id(&StsIdentityResolver::new(&sdk_config)).await;

    let log_groups = config.log_groups(unix_now());
    let positions = match position_store
        .reconcile(&log_groups)
        .and_then(|_| position_store.load())
    {
        Ok(positions) => positions.unwrap_or_default(),
        Err(e) => {
            error!(
                "Failed to read position file {}: {e}",
                position_store.path().display()
            );
            return ExitCode::FAILURE;
        }
    };

    let fetcher = Fetcher::new(
        Arc::new(CloudWatchClientFactory::new(sdk_config)),
        config.aws_region.clone(),
        account_id,
        config.max_pages_per_cycle,
    );
    let shipper_factory = LogzioShipperFactory::new(LogzioConfig {
        https_proxy: settings.https_proxy.clone(),
        ..LogzioConfig::new(settings.logzio_listener.clone(), settings.logzio_token.clone())
    });
    let scheduler = Scheduler::new(
        fetcher,
        Arc::new(shipper_factory),
        position_store,
        config.interval(),
    );

    info!(
        "Collecting {} log group(s) every {} minute(s)",
        log_groups.len(),
        config.collection_interval
    );
    let handle = scheduler.start(log_groups, positions);

    wait_for_signal().await;
    handle.shutdown().await;
    info!("Shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Failed to listen for SIGTERM: {e}");
            wait_for_ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        () = wait_for_ctrl_c() => {}
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
    }
}
