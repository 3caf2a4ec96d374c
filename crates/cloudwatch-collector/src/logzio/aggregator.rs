// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffering of serialized events into bulk payloads.
//!
//! The listener's bulk API takes newline delimited JSON:
//! ```text
//! {"message":"Log entry 1","@timestamp":1681389974000}
//! {"message":"Log entry 2","@timestamp":1681389975000}
//! ```

use std::collections::VecDeque;
use tracing::warn;

/// Maximum size of one bulk request body.
pub(crate) const MAX_BULK_SIZE_BYTES: usize = 10 * 1_024 * 1_024;

/// Events above this size are rejected by the listener and dropped here.
pub(crate) const MAX_LOG_SIZE_BYTES: usize = 500 * 1_000;

/// Oldest events are evicted once this many are queued.
const MAX_LOG_QUEUE_SIZE: usize = 50_000;

#[derive(Debug, Clone)]
pub struct Aggregator {
    messages: VecDeque<String>,
    max_bulk_size_bytes: usize,
    max_log_size_bytes: usize,
    max_log_queue_size: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::new(MAX_BULK_SIZE_BYTES, MAX_LOG_SIZE_BYTES)
    }
}

impl Aggregator {
    #[must_use]
    pub fn new(max_bulk_size_bytes: usize, max_log_size_bytes: usize) -> Self {
        Aggregator {
            messages: VecDeque::new(),
            max_bulk_size_bytes,
            max_log_size_bytes,
            max_log_queue_size: MAX_LOG_QUEUE_SIZE,
        }
    }

    pub fn add(&mut self, log: String) {
        if log.len() > self.max_log_size_bytes {
            warn!(
                "Log size {} exceeds the {} bytes limit, dropping it",
                log.len(),
                self.max_log_size_bytes
            );
            return;
        }
        if self.messages.len() >= self.max_log_queue_size {
            self.messages.pop_front();
            warn!(
                "Log queue full ({} items), dropping oldest log message",
                self.max_log_queue_size
            );
        }
        self.messages.push_back(log);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drains queued events into one bulk payload no larger than the bulk
    /// limit. Always takes at least one event when the queue is not empty.
    ///
    /// Returns an empty vector when nothing is queued.
    pub fn get_batch(&mut self) -> Vec<u8> {
        let mut buffer = Vec::new();
        while let Some(log) = self.messages.pop_front() {
            if !buffer.is_empty() && buffer.len() + log.len() + 1 > self.max_bulk_size_bytes {
                self.messages.push_front(log);
                break;
            }
            buffer.extend_from_slice(log.as_bytes());
            buffer.push(b'\n');
        }
        buffer
    }

    pub fn get_all_batches(&mut self) -> Vec<Vec<u8>> {
        let mut batches = Vec::new();
        loop {
            let batch = self.get_batch();
            if batch.is_empty() {
                break;
            }
            batches.push(batch);
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_batch() {
        let mut aggregator = Aggregator::default();
        aggregator.add(r#"{"message":"one"}"#.to_string());
        aggregator.add(r#"{"message":"two"}"#.to_string());

        assert_eq!(
            aggregator.get_batch(),
            b"{\"message\":\"one\"}\n{\"message\":\"two\"}\n".to_vec()
        );
        assert!(aggregator.is_empty());
        assert!(aggregator.get_batch().is_empty());
    }

    #[test]
    fn test_batches_respect_bulk_size() {
        // three 9 byte lines (with newline) per 30 byte bulk
        let mut aggregator = Aggregator::new(30, 20);
        for i in 0..7 {
            aggregator.add(format!("event-{i}0"));
        }

        let batches = aggregator.get_all_batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], b"event-00\nevent-10\nevent-20\n".to_vec());
        assert_eq!(batches[2], b"event-60\n".to_vec());
        assert!(batches.iter().all(|batch| batch.len() <= 30));
    }

    #[test]
    fn test_oversized_log_is_dropped() {
        let mut aggregator = Aggregator::new(100, 10);
        aggregator.add("x".repeat(11));
        aggregator.add("small".to_string());

        assert_eq!(aggregator.len(), 1);
        assert_eq!(aggregator.get_batch(), b"small\n".to_vec());
    }

    #[test]
    fn test_log_larger_than_bulk_still_ships_alone() {
        let mut aggregator = Aggregator::new(4, 100);
        aggregator.add("longer-than-bulk".to_string());
        aggregator.add("ab".to_string());

        let batches = aggregator.get_all_batches();
        assert_eq!(batches, vec![b"longer-than-bulk\n".to_vec(), b"ab\n".to_vec()]);
    }

    #[test]
    fn test_queue_evicts_oldest() {
        let mut aggregator = Aggregator::new(MAX_BULK_SIZE_BYTES, MAX_LOG_SIZE_BYTES);
        aggregator.max_log_queue_size = 2;
        aggregator.add("first".to_string());
        aggregator.add("second".to_string());
        aggregator.add("third".to_string());

        assert_eq!(aggregator.get_batch(), b"second\nthird\n".to_vec());
    }
}
