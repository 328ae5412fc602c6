//! Shared configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Line encoding of the process log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact single-line text for terminals.
    #[default]
    Text,
    /// One JSON object per event, fields flattened, for log shippers.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive applied when `RUST_LOG` is unset,
    /// e.g. `"info"` or `"clubcast_webrtc=debug,info"`.
    pub filter: String,
    pub format: LogFormat,
    /// Append events to this file instead of stdout.
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
            file_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_deserialize_fills_missing_fields() {
        let config: LoggingConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter, "info");
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_format_roundtrip() {
        assert_eq!(serde_json::to_string(&LogFormat::Text).unwrap(), r#""text""#);
        assert_eq!(
            serde_json::from_str::<LogFormat>(r#""json""#).unwrap(),
            LogFormat::Json
        );
    }
}
