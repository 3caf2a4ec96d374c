// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

/// Destination of normalized events.
///
/// Events are buffered by [`Shipper::enqueue`] and sent by
/// [`Shipper::flush`]. Delivery failures are handled (and logged) by the
/// implementation; the collector never retries a flush.
#[async_trait]
pub trait Shipper: Send {
    fn enqueue(&mut self, line: String);

    async fn flush(&mut self);
}

/// Creates the shipper owned by each log group worker.
pub trait ShipperFactory: Send + Sync {
    fn create(&self) -> Box<dyn Shipper>;
}
