//! # Application State Management
//!
//! Shared state that HTTP handlers and WebSocket actors access concurrently.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (every handler and actor holds a clone)
//! - **RwLock**: Many readers or one writer at a time
//! - **T**: The configuration or metrics being protected
//!
//! Lock poisoning is recovered from rather than propagated: the protected
//! data is plain counters and config, which stay consistent even if a
//! holder panicked mid-update.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across requests and voice sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Voice sessions currently connected
    pub active_sessions: u32,

    /// Voice sessions accepted since server start
    pub total_sessions: u64,

    /// Client audio frames forwarded to the assistant
    pub audio_frames_in: u64,

    /// Assistant audio frames sent to clients
    pub audio_frames_out: u64,

    /// Barge-ins relayed to clients
    pub interruptions: u64,

    /// Tool calls executed for the assistant
    pub tool_calls: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Which session counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCounter {
    AudioIn,
    AudioOut,
    Interruption,
    ToolCall,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    /// Increment the total error counter (4xx/5xx responses).
    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Reserve a voice session slot.
    ///
    /// ## Returns:
    /// - **true**: slot taken; the caller must later call `release_session`
    /// - **false**: `limit` sessions are already active
    pub fn try_acquire_session(&self, limit: usize) -> bool {
        let mut metrics = self.metrics_mut();
        if metrics.active_sessions as usize >= limit {
            return false;
        }
        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
        true
    }

    /// Give back a slot taken with `try_acquire_session`. Never underflows.
    pub fn release_session(&self) {
        let mut metrics = self.metrics_mut();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record(&self, counter: SessionCounter) {
        let mut metrics = self.metrics_mut();
        match counter {
            SessionCounter::AudioIn => metrics.audio_frames_in += 1,
            SessionCounter::AudioOut => metrics.audio_frames_out += 1,
            SessionCounter::Interruption => metrics.interruptions += 1,
            SessionCounter::ToolCall => metrics.tool_calls += 1,
        }
    }

    /// Consistent copy of all counters, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate in [0.0, 1.0].
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
