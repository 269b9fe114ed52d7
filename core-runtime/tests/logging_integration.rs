//! Integration tests for logging system

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, redact_if_sensitive, strip_path, LogFormat, LoggingConfig};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CollectingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CollectingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

// Global subscriber can only be installed once per process, so everything
// that depends on it lives in this one test.
#[test]
fn test_global_logging_forwards_to_sink() {
    let sink = Arc::new(CollectingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_filter("logging_integration=debug")
        .with_logger_sink(sink.clone());

    init_logging(config).unwrap();

    tracing::info!(asset_id = "IMG_0001", api_key = "secret", "asset uploaded");
    tracing::trace!("filtered out");

    {
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "asset uploaded");
        assert_eq!(entries[0].fields.get("asset_id"), Some(&"IMG_0001".to_string()));
        assert_eq!(entries[0].fields.get("api_key"), Some(&"[REDACTED]".to_string()));
    }

    let second = init_logging(LoggingConfig::default());
    assert!(second.is_err());
}

#[test]
fn test_secret_redaction() {
    assert_eq!(redact_if_sensitive("api_key", "k-123"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("x-api-key", "k-123"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("authorization", "Bearer x"), "[REDACTED]");

    let redacted = redact_if_sensitive("owner", "user@example.com");
    assert!(!redacted.contains("example.com"));

    assert_eq!(redact_if_sensitive("device_id", "asset-sync-rs"), "asset-sync-rs");
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/home/user/Pictures/2024/IMG_0001.HEIC"), "IMG_0001.HEIC");
    assert_eq!(strip_path("D:\\Photos\\clip.mov"), "clip.mov");
    assert_eq!(strip_path("filename.jpg"), "filename.jpg");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_pii_redaction(false)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact_pii);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
