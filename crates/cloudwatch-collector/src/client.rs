// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Seams towards the AWS APIs the collector talks to.
//!
//! The collector only depends on these traits; the binary provides the
//! implementations backed by the AWS SDK.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

/// A single CloudWatch event as returned by `FilterLogEvents`, keyed by the
/// API's field names (`logStreamName`, `timestamp`, `message`, ...).
pub type LogEvent = Map<String, Value>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilterLogEventsOutput {
    pub events: Vec<LogEvent>,
    pub next_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to create client: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected response: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetches events of `log_group` within `[start_time_ms, end_time_ms]`.
    async fn filter_log_events(
        &self,
        log_group: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        next_token: Option<&str>,
    ) -> Result<FilterLogEventsOutput, ClientError>;
}

/// Builds a [`LogSource`] for a region at the start of every fetch cycle.
#[async_trait]
pub trait LogSourceFactory: Send + Sync {
    async fn connect(&self, region: &str) -> Result<Box<dyn LogSource>, ClientError>;
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn account_id(&self) -> Result<String, ClientError>;
}

/// Resolves the AWS account id, falling back to an empty string.
pub async fn resolve_account_id(resolver: &dyn IdentityResolver) -> String {
    match resolver.account_id().await {
        Ok(account_id) => {
            debug!("AWS account id: {account_id}");
            account_id
        }
        Err(e) => {
            error!("Encountered error while getting AWS account id: {e}");
            String::new()
        }
    }
}
