//! Tracing subscriber construction for the framework.
//!
//! One structured record per action dispatch flows through here; the
//! formatter (text or JSON) and level filter come from [`LoggerConfig`],
//! and output goes through a [`LogSink`] capability.

mod sink;

use std::sync::Arc;

use {
    axon_config::LoggerConfig,
    tracing::subscriber::Subscriber,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

pub use sink::{CollectingSink, LogSink, SinkWriter, StdoutSink};

/// Build a subscriber for the given config and sink.
///
/// Separated from [`init`] so tests can install it locally with
/// `tracing::subscriber::with_default` and a [`CollectingSink`].
pub fn build_subscriber(
    config: &LoggerConfig,
    sink: Arc<dyn LogSink>,
) -> impl Subscriber + Send + Sync + use<> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = SinkWriter::new(sink);

    let (text_layer, json_layer) = if config.format == "json" {
        (None, Some(fmt::layer().json().with_writer(writer)))
    } else {
        (
            Some(
                fmt::layer()
                    .with_ansi(config.colorize)
                    .with_writer(writer),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init(config: &LoggerConfig) {
    let _ = build_subscriber(config, Arc::new(StdoutSink)).try_init();
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn json_config() -> LoggerConfig {
        LoggerConfig {
            level: "debug".into(),
            format: "json".into(),
            colorize: false,
        }
    }

    #[test]
    fn json_lines_reach_the_sink() {
        let sink = CollectingSink::new();
        let subscriber = build_subscriber(&json_config(), Arc::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(action = "status", status = "OK", "action dispatched");
        });

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed["fields"]["action"], "status");
        assert_eq!(parsed["fields"]["status"], "OK");
    }

    #[test]
    fn level_filter_drops_below_threshold() {
        let sink = CollectingSink::new();
        let config = LoggerConfig {
            level: "warn".into(),
            ..json_config()
        };
        let subscriber = build_subscriber(&config, Arc::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("too quiet");
            tracing::warn!("loud enough");
        });
        assert_eq!(sink.lines().len(), 1);
    }
}
