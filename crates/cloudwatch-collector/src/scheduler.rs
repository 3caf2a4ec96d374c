// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One polling worker per log group, with coordinated shutdown.
//!
//! Every worker runs the same loop:
//!
//! ```text
//!   Idle ──> Fetching ──> Sleeping ──> Fetching ...
//!                             │
//!                        (cancelled)
//!                             v
//!                       Terminating ──> Terminated
//! ```
//!
//! Cancellation is only observed while sleeping, so a fetch in flight always
//! completes before its worker exits. Positions are written under a single
//! mutex shared by all workers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::fetch::{unix_now, Fetcher};
use crate::position::{apply_position, Position, PositionStore};
use crate::shipper::ShipperFactory;
use crate::source::LogGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Sleeping,
    Terminating,
    Terminated,
}

type WorkerStates = Arc<RwLock<HashMap<String, WorkerState>>>;

struct WorkerContext {
    fetcher: Fetcher,
    shipper_factory: Arc<dyn ShipperFactory>,
    position_store: Mutex<PositionStore>,
    positions: Vec<Position>,
    interval: Duration,
    states: WorkerStates,
}

pub struct Scheduler {
    fetcher: Fetcher,
    shipper_factory: Arc<dyn ShipperFactory>,
    position_store: PositionStore,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        fetcher: Fetcher,
        shipper_factory: Arc<dyn ShipperFactory>,
        position_store: PositionStore,
        interval: Duration,
    ) -> Self {
        Scheduler {
            fetcher,
            shipper_factory,
            position_store,
            interval,
        }
    }

    /// Spawns one worker per log group.
    ///
    /// `positions` is the reconciled content of the position file, read
    /// before any worker starts; each worker resumes from its entry.
    pub fn start(self, log_groups: Vec<LogGroup>, positions: Vec<Position>) -> SchedulerHandle {
        let states: WorkerStates = Arc::new(RwLock::new(
            log_groups
                .iter()
                .map(|log_group| (log_group.path().to_string(), WorkerState::Idle))
                .collect(),
        ));
        let context = Arc::new(WorkerContext {
            fetcher: self.fetcher,
            shipper_factory: self.shipper_factory,
            position_store: Mutex::new(self.position_store),
            positions,
            interval: self.interval,
            states: Arc::clone(&states),
        });
        let cancel_token = CancellationToken::new();

        let mut workers = JoinSet::new();
        for log_group in log_groups {
            info!("Starting collection of {}", log_group.path());
            workers.spawn(run_worker(
                log_group,
                Arc::clone(&context),
                cancel_token.clone(),
            ));
        }

        SchedulerHandle {
            cancel_token,
            workers,
            states,
        }
    }
}

pub struct SchedulerHandle {
    cancel_token: CancellationToken,
    workers: JoinSet<()>,
    states: WorkerStates,
}

impl SchedulerHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub async fn state(&self, log_group: &str) -> Option<WorkerState> {
        self.states.read().await.get(log_group).copied()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signals every worker to stop and waits until all of them returned.
    pub async fn shutdown(mut self) {
        info!("Signal caught...");
        self.cancel_token.cancel();
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!("Worker terminated abnormally: {e}");
            }
        }
        info!("All workers terminated");
    }
}

async fn run_worker(
    mut log_group: LogGroup,
    context: Arc<WorkerContext>,
    cancel_token: CancellationToken,
) {
    apply_position(&context.positions, &mut log_group);
    let mut shipper = context.shipper_factory.create();

    loop {
        set_state(&context.states, &log_group, WorkerState::Fetching).await;
        let now = unix_now();
        let cycle = AssertUnwindSafe(context.fetcher.fetch_until(
            &mut log_group,
            shipper.as_mut(),
            now,
        ))
        .catch_unwind()
        .await;
        let new_logs = match cycle {
            Ok(new_logs) => new_logs,
            Err(_) => {
                error!(
                    "Unexpected failure while fetching log events for {}",
                    log_group.path()
                );
                log_group.latest_time = now;
                false
            }
        };

        if new_logs {
            save_position(&context.position_store, &log_group).await;
        }

        set_state(&context.states, &log_group, WorkerState::Sleeping).await;
        tokio::select! {
            () = cancel_token.cancelled() => break,
            () = tokio::time::sleep(context.interval) => {}
        }
    }

    set_state(&context.states, &log_group, WorkerState::Terminating).await;
    info!("Terminating collection of {}", log_group.path());
    set_state(&context.states, &log_group, WorkerState::Terminated).await;
}

/// Writes the cursor of `log_group` off the runtime threads, holding the
/// store lock until the write is done.
async fn save_position(position_store: &Mutex<PositionStore>, log_group: &LogGroup) {
    let position_store = position_store.lock().await;
    let store = position_store.clone();
    let snapshot = log_group.clone();
    match tokio::task::spawn_blocking(move || store.upsert(&snapshot)).await {
        Ok(Ok(())) => debug!("Updated position of {}", log_group.path()),
        Ok(Err(e)) => error!(
            "Failed to update position file for {}: {e}",
            log_group.path()
        ),
        Err(e) => error!(
            "Position update task for {} failed: {e}",
            log_group.path()
        ),
    }
}

async fn set_state(states: &WorkerStates, log_group: &LogGroup, state: WorkerState) {
    states
        .write()
        .await
        .insert(log_group.path().to_string(), state);
}
