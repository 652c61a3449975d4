//! Configuration for the workflow worker
//!
//! This module contains the configuration types and loading functionality.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;
use uuid::Uuid;

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Topic pattern the worker consumes, e.g. `auxWorkflow.#`
    #[serde(default = "default_topic_pattern")]
    pub topic_pattern: String,

    /// Identity used in the process registry
    #[serde(default = "default_process_id")]
    pub process_id: String,

    /// Process kind recorded in the registry
    #[serde(default = "default_worker_kind")]
    pub worker_kind: String,

    /// Seconds after which the worker stops accepting new deliveries and
    /// exits; the process manager starts a fresh one
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,

    /// Interval between liveness heartbeats
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Upper bound on outbox messages recovered per startup drain
    #[serde(default = "default_outbox_drain_limit")]
    pub outbox_drain_limit: usize,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_topic_pattern() -> String {
    "auxWorkflow.#".to_string()
}

fn default_process_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_worker_kind() -> String {
    "workflowWorker".to_string()
}

fn default_max_lifetime() -> u64 {
    3600
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_outbox_drain_limit() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            topic_pattern: default_topic_pattern(),
            process_id: default_process_id(),
            worker_kind: default_worker_kind(),
            max_lifetime_secs: default_max_lifetime(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            outbox_drain_limit: default_outbox_drain_limit(),
            log_level: default_log_level(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Ok(pattern) = env::var("WORKER_TOPIC_PATTERN") {
            config.topic_pattern = pattern;
        }

        if let Ok(process_id) = env::var("WORKER_PROCESS_ID") {
            config.process_id = process_id;
        }

        if let Ok(kind) = env::var("WORKER_KIND") {
            config.worker_kind = kind;
        }

        if let Ok(lifetime) = env::var("WORKER_MAX_LIFETIME_SECS") {
            if let Ok(secs) = lifetime.parse::<u64>() {
                config.max_lifetime_secs = secs;
            } else {
                warn!("Invalid WORKER_MAX_LIFETIME_SECS value: {}", lifetime);
            }
        }

        if let Ok(interval) = env::var("WORKER_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                config.heartbeat_interval_secs = secs;
            } else {
                warn!("Invalid WORKER_HEARTBEAT_INTERVAL_SECS value: {}", interval);
            }
        }

        if let Ok(limit) = env::var("WORKER_OUTBOX_DRAIN_LIMIT") {
            if let Ok(limit) = limit.parse::<usize>() {
                config.outbox_drain_limit = limit;
            } else {
                warn!("Invalid WORKER_OUTBOX_DRAIN_LIMIT value: {}", limit);
            }
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.log_level = log_level;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.topic_pattern, "auxWorkflow.#");
        assert_eq!(config.worker_kind, "workflowWorker");
        assert_eq!(config.max_lifetime_secs, 3600);
        assert!(!config.process_id.is_empty());
    }

    #[test]
    fn test_deserialize_with_partial_fields() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{"topic_pattern": "originWorkflow.#", "max_lifetime_secs": 600}"#,
        )
        .unwrap();
        assert_eq!(config.topic_pattern, "originWorkflow.#");
        assert_eq!(config.max_lifetime_secs, 600);
        assert_eq!(config.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_fresh_process_ids_are_unique() {
        let a = WorkerConfig::default();
        let b = WorkerConfig::default();
        assert_ne!(a.process_id, b.process_id);
    }
}
