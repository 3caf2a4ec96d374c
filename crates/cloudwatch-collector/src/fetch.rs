// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A single fetch cycle of one log group.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info};

use crate::client::LogSourceFactory;
use crate::normalize::{additional_fields, process_events};
use crate::shipper::Shipper;
use crate::source::LogGroup;

/// Runs fetch cycles against CloudWatch. Shared by every worker.
pub struct Fetcher {
    client_factory: Arc<dyn LogSourceFactory>,
    region: String,
    account_id: String,
    max_pages_per_cycle: usize,
}

impl Fetcher {
    pub fn new(
        client_factory: Arc<dyn LogSourceFactory>,
        region: impl Into<String>,
        account_id: impl Into<String>,
        max_pages_per_cycle: usize,
    ) -> Self {
        Fetcher {
            client_factory,
            region: region.into(),
            account_id: account_id.into(),
            max_pages_per_cycle: max_pages_per_cycle.max(1),
        }
    }

    /// Fetches new events of `log_group` and ships them.
    ///
    /// Returns whether any events were shipped.
    pub async fn fetch(&self, log_group: &mut LogGroup, shipper: &mut dyn Shipper) -> bool {
        self.fetch_until(log_group, shipper, unix_now()).await
    }

    /// Same as [`Fetcher::fetch`] with the end of the window given in unix
    /// seconds.
    ///
    /// `latest_time` is moved to `now` once the requests are done, whether or
    /// not they succeeded. Only a failure to create the client leaves the
    /// cursor untouched.
    pub async fn fetch_until(
        &self,
        log_group: &mut LogGroup,
        shipper: &mut dyn Shipper,
        now: i64,
    ) -> bool {
        let client = match self.client_factory.connect(&self.region).await {
            Ok(client) => client,
            Err(e) => {
                error!("Encountered error while creating Cloudwatch client: {e}");
                return false;
            }
        };

        let additional_fields = additional_fields(log_group, &self.account_id);
        let mut new_logs = false;

        for _ in 0..self.max_pages_per_cycle {
            debug!(
                log_group = log_group.path(),
                start_time = log_group.latest_time,
                end_time = now,
                next_token = log_group.next_token.as_str(),
                "Fetching log events"
            );
            let next_token = log_group
                .has_next_token()
                .then_some(log_group.next_token.as_str());
            let response = match client
                .filter_log_events(
                    log_group.path(),
                    log_group.latest_time.saturating_mul(1000),
                    now.saturating_mul(1000),
                    next_token,
                )
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(
                        "Error while trying to get log events for {}: {e}",
                        log_group.path()
                    );
                    break;
                }
            };

            let has_more = response.next_token.is_some();
            if let Some(next_token) = response.next_token {
                log_group.next_token = next_token;
            }
            if response.events.is_empty() {
                info!(log_group = log_group.path(), "No new logs at the moment");
                break;
            }

            new_logs = true;
            info!(
                log_group = log_group.path(),
                "Got {} new logs",
                response.events.len()
            );
            process_events(response.events, &additional_fields, shipper);

            if !has_more {
                break;
            }
        }

        log_group.latest_time = now;
        if new_logs {
            shipper.flush().await;
        }
        new_logs
    }
}

/// Current time in unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
