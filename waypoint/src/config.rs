//! Configuration for Waypoint
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

use reach_cache_core::{EvictionCacheConfig, ReachLevel};

use crate::cache::{ResolverConfig, WriteBufferConfig};
use crate::projection::ProjectionConfig;

/// Waypoint - read-through caching gateway for a slow ledger backend
#[derive(Parser, Debug, Clone)]
#[command(name = "waypoint")]
#[command(about = "Caching gateway: reach-aware eviction, tiered resolution, buffered writes")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// Base URL of the authoritative ledger backend
    #[arg(long, env = "LEDGER_URL", default_value = "http://localhost:9000")]
    pub ledger_url: String,

    /// Base URL of the delivery mirror (optional; no mirror tier without it)
    #[arg(long, env = "DELIVERY_URL")]
    pub delivery_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Outbound HTTP request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Per-reach-level cache budget in megabytes
    #[arg(long, env = "REACH_BUDGET_MB", default_value = "64")]
    pub reach_budget_mb: u64,

    /// Maximum single cache entry size in megabytes
    #[arg(long, env = "MAX_ENTRY_MB", default_value = "16")]
    pub max_entry_mb: u64,

    /// Number of oldest entries ranked by priority on each eviction
    #[arg(long, env = "EVICTION_WINDOW", default_value = "16")]
    pub eviction_window: usize,

    /// Idle expiry for cache entries in seconds (unset = no expiry)
    #[arg(long, env = "ENTRY_TTL_SECS")]
    pub entry_ttl_secs: Option<u64>,

    /// Interval between idle-entry cleanup sweeps in seconds
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "60")]
    pub cleanup_interval_secs: u64,

    /// Maximum entries in the projection hot cache
    #[arg(long, env = "HOT_CACHE_ENTRIES", default_value = "10000")]
    pub hot_cache_entries: usize,

    /// Default projection TTL in seconds
    #[arg(long, env = "HOT_CACHE_TTL_SECS", default_value = "300")]
    pub hot_cache_ttl_secs: u64,

    /// Ledger tier timeout in milliseconds
    #[arg(long, env = "LEDGER_TIMEOUT_MS", default_value = "2000")]
    pub ledger_timeout_ms: u64,

    /// Delivery tier timeout in milliseconds
    #[arg(long, env = "DELIVERY_TIMEOUT_MS", default_value = "1500")]
    pub delivery_timeout_ms: u64,

    /// Write buffer profile: interactive, bulk-import, recovery-sync
    #[arg(long, env = "WRITE_PROFILE", default_value = "interactive")]
    pub write_profile: String,
}

impl Args {
    /// Validate configuration, returning a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.eviction_window == 0 {
            return Err("eviction window must be at least 1".to_string());
        }
        if self.reach_budget_mb == 0 {
            return Err("reach budget must be non-zero".to_string());
        }
        if self.max_entry_mb > self.reach_budget_mb {
            return Err(format!(
                "max entry size ({} MB) exceeds the reach budget ({} MB)",
                self.max_entry_mb, self.reach_budget_mb
            ));
        }
        if !matches!(
            self.write_profile.as_str(),
            "interactive" | "bulk-import" | "recovery-sync"
        ) {
            return Err(format!(
                "unknown write profile '{}' (expected interactive, bulk-import, or recovery-sync)",
                self.write_profile
            ));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> EvictionCacheConfig {
        EvictionCacheConfig {
            reach_budgets: [self.reach_budget_mb * 1024 * 1024; ReachLevel::COUNT],
            max_entry_bytes: self.max_entry_mb * 1024 * 1024,
            eviction_window: self.eviction_window,
            entry_ttl_ms: self.entry_ttl_secs.map(|secs| secs * 1000),
        }
    }

    pub fn projection_config(&self) -> ProjectionConfig {
        ProjectionConfig {
            max_entries: self.hot_cache_entries,
            default_ttl_secs: self.hot_cache_ttl_secs,
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            ledger_timeout_ms: self.ledger_timeout_ms,
            delivery_timeout_ms: self.delivery_timeout_ms,
        }
    }

    pub fn write_buffer_config(&self) -> WriteBufferConfig {
        match self.write_profile.as_str() {
            "bulk-import" => WriteBufferConfig::for_bulk_import(),
            "recovery-sync" => WriteBufferConfig::for_recovery_sync(),
            _ => WriteBufferConfig::for_interactive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::parse_from(["waypoint"])
    }

    #[test]
    fn defaults_validate() {
        assert!(args().validate().is_ok());
    }

    #[test]
    fn zero_window_rejected() {
        let mut a = args();
        a.eviction_window = 0;
        assert!(a.validate().is_err());
    }

    #[test]
    fn unknown_profile_rejected() {
        let mut a = args();
        a.write_profile = "yolo".to_string();
        assert!(a.validate().is_err());
    }

    #[test]
    fn profile_selects_buffer_config() {
        let mut a = args();
        a.write_profile = "bulk-import".to_string();
        assert_eq!(a.write_buffer_config().batch_size, 500);
        a.write_profile = "recovery-sync".to_string();
        assert_eq!(a.write_buffer_config().max_retries, 12);
    }

    #[test]
    fn cache_config_converts_units() {
        let config = args().cache_config();
        assert_eq!(config.reach_budgets[0], 64 * 1024 * 1024);
        assert_eq!(config.max_entry_bytes, 16 * 1024 * 1024);
        assert!(config.entry_ttl_ms.is_none());
    }
}
