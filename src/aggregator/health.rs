//! Per-source health tracking for the aggregator.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::adapter::SourceName;

const ERROR_HISTORY_CAP: usize = 100;

/// A single recorded search failure for one source.
#[derive(Debug, Clone)]
pub struct SourceError {
    pub message: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct SourceState {
    errors: Vec<SourceError>,
}

/// Bounded per-source error history plus availability, used to answer
/// `getHealthStatus` without hitting the network.
pub struct HealthTracker {
    state: RwLock<HashMap<SourceName, SourceState>>,
    min_successful_sources: usize,
}

impl HealthTracker {
    pub fn new(min_successful_sources: usize) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            min_successful_sources,
        }
    }

    pub async fn record_error(&self, source: SourceName, message: impl Into<String>, attempt: u32) {
        let mut state = self.state.write().await;
        let entry = state.entry(source).or_default();
        entry.errors.push(SourceError {
            message: message.into(),
            attempt,
            timestamp: Utc::now(),
        });
        if entry.errors.len() > ERROR_HISTORY_CAP {
            let excess = entry.errors.len() - ERROR_HISTORY_CAP;
            entry.errors.drain(0..excess);
        }
    }

    pub async fn status_for(&self, source: SourceName, available: bool) -> SourceHealthStatus {
        let state = self.state.read().await;
        let one_hour_ago = Utc::now() - Duration::hours(1);
        let recent_errors = state
            .get(&source)
            .map(|s| {
                s.errors
                    .iter()
                    .filter(|e| e.timestamp >= one_hour_ago)
                    .count()
            })
            .unwrap_or(0);
        let last_error = state
            .get(&source)
            .and_then(|s| s.errors.last())
            .map(|e| e.message.clone());

        SourceHealthStatus {
            source,
            available,
            recent_errors,
            last_error,
        }
    }

    pub fn overall_healthy(&self, available_count: usize) -> bool {
        available_count >= self.min_successful_sources
    }
}

#[derive(Debug, Clone)]
pub struct SourceHealthStatus {
    pub source: SourceName,
    pub available: bool,
    pub recent_errors: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub sources: Vec<SourceHealthStatus>,
    pub overall_healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_history_is_bounded() {
        let tracker = HealthTracker::new(2);
        for i in 0..150 {
            tracker
                .record_error(SourceName::Arxiv, format!("err {i}"), 0)
                .await;
        }
        let status = tracker.status_for(SourceName::Arxiv, true).await;
        // All 150 occurred within the last hour; count is bounded by history cap.
        assert!(status.recent_errors <= ERROR_HISTORY_CAP);
    }

    #[test]
    fn overall_healthy_respects_threshold() {
        let tracker = HealthTracker::new(3);
        assert!(!tracker.overall_healthy(2));
        assert!(tracker.overall_healthy(3));
    }
}
