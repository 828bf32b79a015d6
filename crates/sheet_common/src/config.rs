//! Typed configuration covering every key enumerated in spec.md §6. Loading
//! mechanics (file watching, env precedence) are out of scope per §A.1; the
//! typed struct, its defaults, and validation are the in-scope ambient
//! concern.

use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub burst: u32,
    pub sustained: u32,
    pub refill_per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { burst: 20, sustained: 10, refill_per_second: 10.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub jitter: f64,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_deadline: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
            request_timeout: Duration::from_secs(30),
            request_deadline: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_group_size: usize,
    pub merge_adjacent: bool,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_millis(50),
            max_group_size: 32,
            merge_adjacent: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(2), max_entries: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub max_operations: usize,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub auto_snapshot: bool,
    pub auto_rollback: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_operations: 100,
            timeout: Duration::from_secs(5 * 60),
            max_concurrent: 10,
            auto_snapshot: false,
            auto_rollback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub max_full_size_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_full_size_bytes: 50 * 1024 * 1024,
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_per_user: usize,
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_per_user: 10, default_ttl: Duration::from_secs(60 * 60) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub max_entries: usize,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { max_entries: 5000, ttl: Duration::from_secs(5 * 60) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub sink_url: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true, sink_url: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPatternConfig {
    pub window_size: usize,
    pub frequency_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub pattern_window: Duration,
}

impl Default for AccessPatternConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            frequency_threshold: 2,
            pattern_window: Duration::from_secs(5 * 60 * 2),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rate: RateLimiterConfig,
    pub circuit: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub merger: MergerConfig,
    pub dedup: DedupConfig,
    pub tx: TransactionConfig,
    pub snapshot: SnapshotConfig,
    pub session: SessionConfig,
    pub events: EventsConfig,
    pub audit: AuditConfig,
    pub access_pattern: AccessPatternConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.circuit.failure_threshold, 5);
        assert_eq!(cfg.circuit.success_threshold, 2);
        assert_eq!(cfg.circuit.timeout, Duration::from_secs(30));
        assert_eq!(cfg.merger.window, Duration::from_millis(50));
        assert_eq!(cfg.dedup.ttl, Duration::from_secs(2));
        assert_eq!(cfg.dedup.max_entries, 256);
        assert_eq!(cfg.tx.max_operations, 100);
        assert_eq!(cfg.tx.max_concurrent, 10);
        assert_eq!(cfg.tx.timeout, Duration::from_secs(300));
        assert_eq!(cfg.snapshot.ttl, Duration::from_secs(3600));
        assert_eq!(cfg.snapshot.max_full_size_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.session.max_per_user, 10);
        assert_eq!(cfg.events.max_entries, 5000);
        assert_eq!(cfg.events.ttl, Duration::from_secs(300));
        assert_eq!(cfg.retry.jitter, 0.2);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tx.max_operations, cfg.tx.max_operations);
    }
}
