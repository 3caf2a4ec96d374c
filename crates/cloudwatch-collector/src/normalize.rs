// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event normalization before shipping.
//!
//! Each CloudWatch event goes through a fixed list of steps:
//!
//! 1. merge the log group's additional fields
//! 2. `logStreamName` becomes `logStream`
//! 3. `eventId` becomes `id`
//! 4. trailing newline removal and `log_level` detection on `message`
//! 5. `timestamp` becomes `@timestamp`
//!
//! Steps are independent. A step that fails is logged and skipped for that
//! event only; the event is still shipped.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::client::LogEvent;
use crate::shipper::Shipper;
use crate::source::LogGroup;

pub const SHIPPER: &str = "cw-fetcher";
pub const DEFAULT_TYPE: &str = "cloudwatch";

pub const FIELD_NAMESPACE: &str = "namespace";
pub const FIELD_LOG_GROUP: &str = "logGroup";
pub const FIELD_LOG_STREAM: &str = "logStream";
pub const FIELD_OWNER: &str = "owner";
pub const FIELD_SHIPPER: &str = "shipper";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_ID: &str = "id";
pub const FIELD_LOG_LEVEL: &str = "log_level";
pub const FIELD_TIMESTAMP: &str = "@timestamp";

const KEY_LOG_STREAM_NAME: &str = "logStreamName";
const KEY_EVENT_ID: &str = "eventId";
const KEY_MESSAGE: &str = "message";
const KEY_TIMESTAMP: &str = "timestamp";

const LOG_LEVELS: &[&str] = &[
    "ALERT",
    "TRACE",
    "DEBUG",
    "NOTICE",
    "INFO",
    "WARN",
    "WARNING",
    "ERROR",
    "ERR",
    "CRITICAL",
    "CRIT",
    "FATAL",
    "SEVERE",
    "EMERG",
    "EMERGENCY",
];

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("field {field} is not a {expected}")]
    UnexpectedType {
        field: &'static str,
        expected: &'static str,
    },
}

type Step = fn(&mut LogEvent, &Map<String, Value>) -> Result<(), NormalizeError>;

const STEPS: &[(&str, Step)] = &[
    ("add additional fields", add_additional_fields),
    ("rename logStreamName", rename_log_stream),
    ("rename eventId", rename_event_id),
    ("process message", process_message),
    ("process timestamp", process_timestamp),
];

/// Builds the fields added to every event of `log_group` during one cycle.
///
/// Custom fields from the configuration override the built-in ones.
pub fn additional_fields(log_group: &LogGroup, account_id: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        FIELD_LOG_GROUP.to_string(),
        Value::from(log_group.path()),
    );
    fields.insert(FIELD_SHIPPER.to_string(), Value::from(SHIPPER));
    fields.insert(FIELD_TYPE.to_string(), Value::from(DEFAULT_TYPE));
    if !account_id.is_empty() {
        fields.insert(FIELD_OWNER.to_string(), Value::from(account_id));
    }
    if !log_group.namespace().is_empty() {
        fields.insert(
            FIELD_NAMESPACE.to_string(),
            Value::from(log_group.namespace()),
        );
    }
    if let Some(custom_fields) = log_group.custom_fields() {
        for (key, value) in custom_fields {
            fields.insert(key.clone(), value.clone());
        }
    }
    fields
}

/// Runs every normalization step on `event`.
pub fn normalize(mut event: LogEvent, additional_fields: &Map<String, Value>) -> LogEvent {
    for (name, step) in STEPS {
        if let Err(e) = step(&mut event, additional_fields) {
            warn!("Error while trying to {name}: {e}");
        }
    }
    event
}

/// Normalizes `events` and hands them to `shipper` as JSON lines.
///
/// Returns the number of events enqueued.
pub fn process_events(
    events: Vec<LogEvent>,
    additional_fields: &Map<String, Value>,
    shipper: &mut dyn Shipper,
) -> usize {
    let mut enqueued = 0;
    for event in events {
        let event = normalize(event, additional_fields);
        match serde_json::to_string(&event) {
            Ok(line) => {
                shipper.enqueue(line);
                enqueued += 1;
            }
            Err(e) => error!("Failed to serialize event, dropping it: {e}"),
        }
    }
    enqueued
}

/// Finds a known severity in the first `[...]` token of `message`.
pub fn log_level_from_message(message: &str) -> Option<&'static str> {
    let start = message.find('[')?;
    let rest = &message[start + 1..];
    let end = rest.find(']')?;
    let candidate = rest[..end].to_uppercase();
    LOG_LEVELS
        .iter()
        .find(|level| **level == candidate)
        .copied()
}

fn add_additional_fields(
    event: &mut LogEvent,
    additional_fields: &Map<String, Value>,
) -> Result<(), NormalizeError> {
    for (key, value) in additional_fields {
        event.insert(key.clone(), value.clone());
    }
    Ok(())
}

fn rename_log_stream(event: &mut LogEvent, _: &Map<String, Value>) -> Result<(), NormalizeError> {
    rename_field(event, KEY_LOG_STREAM_NAME, FIELD_LOG_STREAM);
    Ok(())
}

fn rename_event_id(event: &mut LogEvent, _: &Map<String, Value>) -> Result<(), NormalizeError> {
    rename_field(event, KEY_EVENT_ID, FIELD_ID);
    Ok(())
}

fn process_message(event: &mut LogEvent, _: &Map<String, Value>) -> Result<(), NormalizeError> {
    let Some(message) = event.get_mut(KEY_MESSAGE) else {
        return Ok(());
    };
    let Value::String(message) = message else {
        return Err(NormalizeError::UnexpectedType {
            field: KEY_MESSAGE,
            expected: "string",
        });
    };

    strip_line_terminator(message);
    if let Some(level) = log_level_from_message(message) {
        event.insert(FIELD_LOG_LEVEL.to_string(), Value::from(level));
    }
    Ok(())
}

fn process_timestamp(event: &mut LogEvent, _: &Map<String, Value>) -> Result<(), NormalizeError> {
    rename_field(event, KEY_TIMESTAMP, FIELD_TIMESTAMP);
    Ok(())
}

fn rename_field(event: &mut LogEvent, from: &str, to: &str) {
    if let Some(value) = event.remove(from) {
        event.insert(to.to_string(), value);
    }
}

fn strip_line_terminator(message: &mut String) {
    if message.ends_with('\n') {
        message.pop();
        if message.ends_with('\r') {
            message.pop();
        }
    }
}
