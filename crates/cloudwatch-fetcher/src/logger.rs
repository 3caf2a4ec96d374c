// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format of the daemon.
//!
//! ```text
//! CW_FETCHER | INFO | Starting collection of /aws/lambda/my-function
//! CW_FETCHER | INFO | No new logs at the moment log_group=/aws/lambda/my-function
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const PREFIX: &str = "CW_FETCHER";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "{PREFIX} | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Builds the filter for `log_level`, silencing the noisy HTTP stack.
///
/// Unknown levels fall back to `info`.
pub fn env_filter(log_level: &str) -> EnvFilter {
    let directives = format!("h2=off,hyper=off,rustls=off,{}", log_level.to_lowercase());
    EnvFilter::try_new(directives)
        .unwrap_or_else(|_| EnvFilter::new("h2=off,hyper=off,rustls=off,info"))
}

/// Installs the global subscriber. Fails if one is already set.
pub fn init(log_level: &str) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level))
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}
