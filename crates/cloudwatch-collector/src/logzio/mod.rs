// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipping to a Logz.io listener over its HTTP bulk API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, error};

use crate::shipper::{Shipper, ShipperFactory};

pub mod aggregator;
pub mod flusher;

use aggregator::Aggregator;
use flusher::Flusher;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ShipperError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("listener rejected the request with status {0}")]
    Rejected(StatusCode),
    #[error("listener responded with status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Clone)]
pub struct LogzioConfig {
    /// Listener base URL, e.g. `https://listener.logz.io:8071`.
    pub listener: String,
    pub token: String,
    pub https_proxy: Option<String>,
    pub timeout: Duration,
    pub retry_count: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff` before retrying.
    pub retry_backoff: Duration,
}

impl LogzioConfig {
    pub fn new(listener: impl Into<String>, token: impl Into<String>) -> Self {
        LogzioConfig {
            listener: listener.into(),
            token: token.into(),
            https_proxy: None,
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Buffers events of one worker and ships them on flush.
pub struct LogzioShipper {
    aggregator: Aggregator,
    flusher: Arc<Flusher>,
}

impl LogzioShipper {
    #[must_use]
    pub fn new(flusher: Arc<Flusher>) -> Self {
        LogzioShipper {
            aggregator: Aggregator::default(),
            flusher,
        }
    }
}

#[async_trait]
impl Shipper for LogzioShipper {
    fn enqueue(&mut self, line: String) {
        self.aggregator.add(line);
    }

    async fn flush(&mut self) {
        let batches = self.aggregator.get_all_batches();
        debug!("Flushing {} bulk(s) to Logz.io", batches.len());
        for batch in batches {
            let size = batch.len();
            if let Err(e) = self.flusher.send(batch).await {
                error!("Failed to ship {size} bytes of logs to Logz.io, dropping them: {e}");
            }
        }
    }
}

/// Hands every worker its own [`LogzioShipper`] over a shared HTTP client.
pub struct LogzioShipperFactory {
    flusher: Arc<Flusher>,
}

impl LogzioShipperFactory {
    #[must_use]
    pub fn new(config: LogzioConfig) -> Self {
        LogzioShipperFactory {
            flusher: Arc::new(Flusher::new(config)),
        }
    }
}

impl ShipperFactory for LogzioShipperFactory {
    fn create(&self) -> Box<dyn Shipper> {
        Box::new(LogzioShipper::new(Arc::clone(&self.flusher)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use tracing_test::traced_test;

    fn factory(listener: String) -> LogzioShipperFactory {
        LogzioShipperFactory::new(LogzioConfig {
            retry_backoff: Duration::from_millis(0),
            ..LogzioConfig::new(listener, "mock-token")
        })
    }

    #[tokio::test]
    async fn test_flush_ships_enqueued_lines() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::UrlEncoded("token".into(), "mock-token".into()))
            .match_body("{\"message\":\"one\"}\n{\"message\":\"two\"}\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut shipper = factory(server.url()).create();
        shipper.enqueue(r#"{"message":"one"}"#.to_string());
        shipper.enqueue(r#"{"message":"two"}"#.to_string());
        shipper.flush().await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_flush_without_lines_sends_nothing() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let mut shipper = factory(server.url()).create();
        shipper.flush().await;

        mock.assert_async().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_flush_drops_lines() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let mut shipper = factory(server.url()).create();
        shipper.enqueue("{}".to_string());
        shipper.flush().await;
        shipper.flush().await;

        mock.assert_async().await;
        assert!(logs_contain("Failed to ship 3 bytes of logs to Logz.io"));
    }
}
