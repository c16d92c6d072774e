//! Request log for the HAR step.
//!
//! Every HTTP exchange the tool performs is recorded here; when the
//! `--har` flag is set the pipeline serializes the log as an HTTP
//! Archive (HAR 1.2) file next to the root manifest.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::Path;
use std::sync::Mutex;

use crate::constants::SPOOL_VERSION;
use crate::utils::fs::atomic_write;

/// One recorded HTTP exchange.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// When the request started.
    pub started: DateTime<Utc>,
    /// HTTP method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Response status, 0 when the request never completed.
    pub status: u16,
    /// Total time in milliseconds.
    pub time_ms: i64,
}

/// Thread-safe request recorder shared through the [`crate::config::Config`].
#[derive(Debug, Default)]
pub struct RequestManager {
    entries: Mutex<Vec<RecordedRequest>>,
}

impl RequestManager {
    /// Record one completed (or failed) exchange.
    pub fn record(&self, method: &str, url: &str, status: u16, time_ms: i64) {
        let entry = RecordedRequest {
            started: Utc::now(),
            method: method.to_string(),
            url: url.to_string(),
            status,
            time_ms,
        };
        self.entries.lock().expect("request log poisoned").push(entry);
    }

    /// Number of recorded exchanges.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("request log poisoned").len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all recorded exchanges. Called once at the end of the
    /// pipeline.
    pub fn clear_cache(&self) {
        self.entries.lock().expect("request log poisoned").clear();
    }

    /// Serialize the log as a HAR 1.2 archive at `path`.
    pub fn save_har(&self, path: &Path) -> Result<()> {
        let entries: Vec<serde_json::Value> = self
            .entries
            .lock()
            .expect("request log poisoned")
            .iter()
            .map(|e| {
                json!({
                    "startedDateTime": e.started.to_rfc3339(),
                    "time": e.time_ms,
                    "request": {
                        "method": e.method,
                        "url": e.url,
                        "httpVersion": "HTTP/1.1",
                        "headers": [],
                        "queryString": [],
                        "cookies": [],
                        "headersSize": -1,
                        "bodySize": -1,
                    },
                    "response": {
                        "status": e.status,
                        "statusText": "",
                        "httpVersion": "HTTP/1.1",
                        "headers": [],
                        "cookies": [],
                        "content": {"size": 0, "mimeType": ""},
                        "redirectURL": "",
                        "headersSize": -1,
                        "bodySize": -1,
                    },
                    "cache": {},
                    "timings": {"send": 0, "wait": e.time_ms, "receive": 0},
                })
            })
            .collect();

        let har = json!({
            "log": {
                "version": "1.2",
                "creator": {"name": "spool", "version": SPOOL_VERSION},
                "entries": entries,
            }
        });

        let content = serde_json::to_vec_pretty(&har)
            .context("Failed to serialize request log")?;
        atomic_write(path, &content)
            .with_context(|| format!("Failed to write request log: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_and_clears() {
        let manager = RequestManager::default();
        manager.record("GET", "https://releases.spool.dev/latest-version", 200, 42);
        assert_eq!(manager.len(), 1);
        manager.clear_cache();
        assert!(manager.is_empty());
    }

    #[test]
    fn saves_har_archive() {
        let temp = TempDir::new().unwrap();
        let manager = RequestManager::default();
        manager.record("GET", "https://example.test/x", 200, 7);

        let path = temp.path().join("out.har");
        manager.save_har(&path).unwrap();

        let har: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(har["log"]["version"], "1.2");
        assert_eq!(har["log"]["entries"][0]["request"]["url"], "https://example.test/x");
        assert_eq!(har["log"]["entries"][0]["response"]["status"], 200);
    }
}
