//! Integration tests for the logging system
//!
//! `init_logging` installs a process-wide subscriber, so everything that needs
//! it lives in a single test.

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use core_runtime::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

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
        LogLevel::Info
    }
}

#[tokio::test]
async fn test_global_subscriber_forwards_to_sink() {
    let sink = Arc::new(CollectingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_logger_sink(sink.clone());

    init_logging(config).unwrap();

    tracing::info!(
        target: "core_sync",
        wave_id = 3,
        phase = "albums",
        "Sync wave resumed"
    );
    tracing::info!(
        target: "core_auth",
        auth = "0123456789abcdef",
        "Handshake complete"
    );
    // Dependencies are filtered to warn
    tracing::info!(target: "sqlx", "query executed");

    // Sink calls run on spawned tasks inside a runtime
    for _ in 0..50 {
        if sink.entries.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let entries = sink.entries.lock().unwrap().clone();
    assert_eq!(entries.len(), 2);

    let resumed = entries
        .iter()
        .find(|e| e.message == "Sync wave resumed")
        .unwrap();
    assert_eq!(resumed.fields.get("wave_id"), Some(&"3".to_string()));
    assert_eq!(resumed.fields.get("phase"), Some(&"albums".to_string()));

    let handshake = entries
        .iter()
        .find(|e| e.message == "Handshake complete")
        .unwrap();
    assert_eq!(handshake.fields.get("auth"), Some(&"[REDACTED]".to_string()));

    // A second installation is rejected
    let second = init_logging(LoggingConfig::default());
    assert!(matches!(second, Err(Error::Config(_))));
}

#[test]
fn test_redaction_of_session_material() {
    assert_eq!(redact_if_sensitive("auth", "token"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("api_key", "key"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Password", "hunter2"), "[REDACTED]");

    let url = "https://music.example.com/server/xml.server.php?action=handshake&auth=abc&user=alice";
    let redacted = redact_if_sensitive("url", url);
    assert!(redacted.contains("auth=[REDACTED]"));
    assert!(redacted.contains("user=alice"));
    assert!(!redacted.contains("auth=abc"));
}

#[test]
fn test_format_selection() {
    #[cfg(debug_assertions)]
    assert_eq!(LoggingConfig::default().format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(LoggingConfig::default().format, LogFormat::Json);
}
