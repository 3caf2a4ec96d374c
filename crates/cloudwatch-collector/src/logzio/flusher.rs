// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::logzio::{LogzioConfig, ShipperError};

/// Sends bulk payloads to the listener, retrying transient failures.
#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    url: String,
    config: LogzioConfig,
}

impl Flusher {
    #[must_use]
    pub fn new(config: LogzioConfig) -> Self {
        let client = get_client(&config);
        let url = format!("{}/", config.listener.trim_end_matches('/'));
        Flusher {
            client,
            url,
            config,
        }
    }

    /// Posts one bulk payload.
    ///
    /// Network errors and 5xx responses are retried up to
    /// `config.retry_count` attempts with a linear backoff. 4xx responses are
    /// never retried.
    pub async fn send(&self, batch: Vec<u8>) -> Result<(), ShipperError> {
        let mut attempts = 0;

        loop {
            let time = Instant::now();
            attempts += 1;
            let resp = self
                .client
                .post(&self.url)
                .query(&[("token", self.config.token.as_str())])
                .header(CONTENT_TYPE, "application/json")
                .body(batch.clone())
                .send()
                .await;
            let elapsed = time.elapsed();

            match resp {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        debug!(
                            "Shipped {} bytes in {} ms",
                            batch.len(),
                            elapsed.as_millis()
                        );
                        return Ok(());
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        error!(
                            "Request was denied by Logz.io: please verify that your shipping token is valid"
                        );
                        return Err(ShipperError::Rejected(status));
                    }
                    if status.is_client_error() {
                        error!(
                            "{}: Logz.io rejected the payload: {:?}",
                            status,
                            resp.text().await.unwrap_or_default()
                        );
                        return Err(ShipperError::Rejected(status));
                    }
                    if attempts >= self.config.retry_count {
                        return Err(ShipperError::Status(status));
                    }
                    warn!("{status}: Failed to ship logs on attempt {attempts}, retrying");
                }
                Err(e) => {
                    if attempts >= self.config.retry_count {
                        error!(
                            "Failed to send request after {} ms and {} attempts: {:?}",
                            elapsed.as_millis(),
                            attempts,
                            e
                        );
                        return Err(ShipperError::Request(e));
                    }
                    warn!("Failed to ship logs on attempt {attempts}, retrying: {e}");
                }
            }

            sleep(self.config.retry_backoff * attempts).await;
        }
    }
}

fn get_client(config: &LogzioConfig) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match reqwest::Client::builder().timeout(config.timeout).build() {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &LogzioConfig) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(config.timeout);
    if let Some(proxy) = &config.https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn config(listener: String) -> LogzioConfig {
        LogzioConfig {
            retry_backoff: Duration::from_millis(0),
            ..LogzioConfig::new(listener, "mock-token")
        }
    }

    #[tokio::test]
    async fn test_send_posts_bulk_with_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::UrlEncoded("token".into(), "mock-token".into()))
            .match_header("content-type", "application/json")
            .match_body("{\"a\":1}\n")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let flusher = Flusher::new(config(server.url()));
        flusher
            .send(b"{\"a\":1}\n".to_vec())
            .await
            .expect("send failed");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_retries_server_errors() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let flusher = Flusher::new(config(server.url()));
        let result = flusher.send(b"{}\n".to_vec()).await;

        assert!(matches!(
            result,
            Err(ShipperError::Status(StatusCode::SERVICE_UNAVAILABLE))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_does_not_retry_bad_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(Matcher::Any)
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let flusher = Flusher::new(config(format!("{}/", server.url())));
        let result = flusher.send(b"{}\n".to_vec()).await;

        assert!(matches!(
            result,
            Err(ShipperError::Rejected(StatusCode::UNAUTHORIZED))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_gives_up_on_unreachable_listener() {
        let flusher = Flusher::new(config("http://127.0.0.1:1".to_string()));
        assert!(matches!(
            flusher.send(b"{}\n".to_vec()).await,
            Err(ShipperError::Request(_))
        ));
    }
}
