// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! AWS SDK backed implementations of the collector's client traits.

use async_trait::async_trait;
use aws_config::{Region, SdkConfig};
use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
use aws_sdk_cloudwatchlogs::types::FilteredLogEvent;
use serde_json::Value;
use tracing::debug;

use cloudwatch_collector::client::{
    ClientError, FilterLogEventsOutput, IdentityResolver, LogEvent, LogSource, LogSourceFactory,
};

/// Creates a CloudWatch Logs client per fetch cycle from a shared SDK config.
pub struct CloudWatchClientFactory {
    sdk_config: SdkConfig,
}

impl CloudWatchClientFactory {
    pub fn new(sdk_config: SdkConfig) -> Self {
        CloudWatchClientFactory { sdk_config }
    }
}

#[async_trait]
impl LogSourceFactory for CloudWatchClientFactory {
    async fn connect(&self, region: &str) -> Result<Box<dyn LogSource>, ClientError> {
        if self.sdk_config.credentials_provider().is_none() {
            return Err(ClientError::Connect(
                "no AWS credentials provider available".to_string(),
            ));
        }
        let config = aws_sdk_cloudwatchlogs::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        Ok(Box::new(CloudWatchLogSource {
            client: aws_sdk_cloudwatchlogs::Client::from_conf(config),
        }))
    }
}

pub struct CloudWatchLogSource {
    client: aws_sdk_cloudwatchlogs::Client,
}

#[async_trait]
impl LogSource for CloudWatchLogSource {
    async fn filter_log_events(
        &self,
        log_group: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        next_token: Option<&str>,
    ) -> Result<FilterLogEventsOutput, ClientError> {
        let output = self
            .client
            .filter_log_events()
            .log_group_name(log_group)
            .start_time(start_time_ms)
            .end_time(end_time_ms)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| ClientError::Request(DisplayErrorContext(e).to_string()))?;

        debug!(
            log_group,
            "FilterLogEvents returned {} event(s)",
            output.events().len()
        );
        Ok(FilterLogEventsOutput {
            events: output.events().iter().map(to_log_event).collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }
}

/// Maps an SDK event to the API's JSON shape. Absent fields are left out.
fn to_log_event(event: &FilteredLogEvent) -> LogEvent {
    let mut record = LogEvent::new();
    if let Some(log_stream_name) = event.log_stream_name() {
        record.insert("logStreamName".to_string(), Value::from(log_stream_name));
    }
    if let Some(timestamp) = event.timestamp() {
        record.insert("timestamp".to_string(), Value::from(timestamp));
    }
    if let Some(message) = event.message() {
        record.insert("message".to_string(), Value::from(message));
    }
    if let Some(ingestion_time) = event.ingestion_time() {
        record.insert("ingestionTime".to_string(), Value::from(ingestion_time));
    }
    if let Some(event_id) = event.event_id() {
        record.insert("eventId".to_string(), Value::from(event_id));
    }
    record
}

pub struct StsIdentityResolver {
    client: aws_sdk_sts::Client,
}

impl StsIdentityResolver {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        StsIdentityResolver {
            client: aws_sdk_sts::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl IdentityResolver for StsIdentityResolver {
    async fn account_id(&self) -> Result<String, ClientError> {
        let identity = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| ClientError::Request(DisplayErrorContext(e).to_string()))?;
        identity
            .account()
            .map(str::to_string)
            .ok_or_else(|| ClientError::MalformedResponse("caller identity has no account".into()))
    }
}
