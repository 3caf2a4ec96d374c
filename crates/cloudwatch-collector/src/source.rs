// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log group descriptors and their resumable cursor.

use serde_json::{Map, Value};

/// Known log group name prefixes and the namespace attached to their events.
///
/// Checked in order; the first prefix the log group path starts with wins.
const NAMESPACE_BY_PREFIX: &[(&str, &str)] = &[
    ("/aws/apigateway/", "aws/apigateway"),
    ("/aws/rds/cluster/", "aws/rds"),
    ("/aws/cloudhsm/", "aws/cloudhsm"),
    ("aws-cloudtrail-logs-", "aws/cloudtrail"),
    ("/aws/codebuild/", "aws/codebuild"),
    ("/aws/connect/", "aws/connect"),
    ("/aws/elasticbeanstalk/", "aws/elasticbeanstalk"),
    ("/aws/ecs/", "aws/ecs"),
    ("/aws/eks/", "aws/eks"),
    ("/aws-glue/", "glue"),
    ("AWSIotLogsV2", "aws/iot"),
    ("/aws/lambda/", "aws/lambda"),
    ("/aws/macie/", "aws/macie"),
    ("/aws/amazonmq/broker/", "aws/amazonmq"),
];

/// User supplied fields merged into every event of a log group.
pub type CustomFields = Map<String, Value>;

/// A configured log group plus the cursor used to resume fetching it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogGroup {
    path: String,
    namespace: String,
    custom_fields: Option<CustomFields>,
    /// Inclusive lower bound (unix seconds) of the next fetch window.
    pub latest_time: i64,
    /// Continuation token returned by CloudWatch, empty when there is none.
    pub next_token: String,
}

impl LogGroup {
    /// Creates a descriptor whose first window starts `interval_minutes`
    /// before `start_time`.
    pub fn new(
        path: impl Into<String>,
        custom_fields: Option<CustomFields>,
        start_time: i64,
        interval_minutes: u64,
    ) -> Self {
        let path = path.into();
        let namespace = namespace_for_path(&path).to_string();
        LogGroup {
            path,
            namespace,
            custom_fields,
            latest_time: first_latest_time(start_time, interval_minutes),
            next_token: String::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Namespace derived from the path, empty when no known prefix matched.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn custom_fields(&self) -> Option<&CustomFields> {
        self.custom_fields.as_ref()
    }

    pub fn has_next_token(&self) -> bool {
        !self.next_token.is_empty()
    }
}

/// Looks up the namespace of a log group by its path prefix.
pub fn namespace_for_path(path: &str) -> &'static str {
    NAMESPACE_BY_PREFIX
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix))
        .map_or("", |(_, namespace)| namespace)
}

fn first_latest_time(start_time: i64, interval_minutes: u64) -> i64 {
    let interval_secs = i64::try_from(interval_minutes.saturating_mul(60)).unwrap_or(i64::MAX);
    start_time.saturating_sub(interval_secs)
}
