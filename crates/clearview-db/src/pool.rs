//! PostgreSQL pool sizing and monitoring.
//!
//! The pool is sized for the service's own workload: one connection per
//! concurrent notification pipeline and video run, plus headroom for HTTP
//! handlers. [`monitor`] samples the pool periodically and warns when every
//! connection is checked out.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use clearview_core::{defaults, Error, Result};

/// Connections reserved for HTTP handlers on top of the task lanes.
pub const HTTP_HEADROOM_CONNECTIONS: u32 = 4;

/// Default acquire timeout in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// How often [`monitor`] samples the pool.
pub const MONITOR_INTERVAL_SECS: u64 = 60;

/// Pool sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_workload(
            defaults::PIPELINE_MAX_CONCURRENT,
            defaults::VIDEO_MAX_CONCURRENT,
        )
    }
}

impl PoolConfig {
    /// Enough connections for every task lane to hold one at once.
    pub fn for_workload(pipelines: usize, video_runs: usize) -> Self {
        let lanes = u32::try_from(pipelines + video_runs).unwrap_or(u32::MAX);
        Self {
            max_connections: lanes.saturating_add(HTTP_HEADROOM_CONNECTIONS),
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }

    /// Workload-sized defaults, overridden by `DB_MAX_CONNECTIONS` and
    /// `DB_CONNECT_TIMEOUT_SECS` when set and valid.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            config.max_connections = n;
        }
        if let Some(secs) = std::env::var("DB_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        config.min_connections = config.min_connections.min(config.max_connections);
        config
    }
}

/// Open a pool and wait for the first connection.
pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Opening database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connected",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}

/// One sample of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max: u32,
}

impl PoolStats {
    pub fn sample(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle(),
            max: pool.options().get_max_connections(),
        }
    }

    pub fn in_use(&self) -> usize {
        (self.size as usize).saturating_sub(self.idle)
    }

    /// Every allowed connection is open and checked out; the next acquire
    /// waits.
    pub fn is_exhausted(&self) -> bool {
        self.max > 0 && self.size >= self.max && self.idle == 0
    }
}

/// Log pool usage; warns when the pool is exhausted.
pub fn log_pool_metrics(pool: &PgPool) -> PoolStats {
    let stats = PoolStats::sample(pool);
    if stats.is_exhausted() {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = stats.size,
            pool_max = stats.max,
            "Database pool exhausted; requests and tasks are waiting for connections"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "pool",
            op = "metrics",
            pool_size = stats.size,
            pool_idle = stats.idle,
            pool_in_use = stats.in_use(),
            "Pool sample"
        );
    }
    stats
}

/// Sample the pool every `every` until the pool is closed.
pub async fn monitor(pool: PgPool, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if pool.is_closed() {
            debug!(subsystem = "db", component = "pool", "Pool closed; monitor stopping");
            break;
        }
        log_pool_metrics(&pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_covers_every_lane() {
        let config = PoolConfig::default();
        let lanes = (defaults::PIPELINE_MAX_CONCURRENT + defaults::VIDEO_MAX_CONCURRENT) as u32;
        assert_eq!(config.max_connections, lanes + HTTP_HEADROOM_CONNECTIONS);
        assert!(config.min_connections <= config.max_connections);
    }

    #[test]
    fn test_for_workload() {
        assert_eq!(PoolConfig::for_workload(2, 1).max_connections, 7);
    }

    #[test]
    fn test_exhaustion() {
        let busy = PoolStats {
            size: 16,
            idle: 0,
            max: 16,
        };
        assert!(busy.is_exhausted());
        assert_eq!(busy.in_use(), 16);

        let growing = PoolStats {
            size: 3,
            idle: 0,
            max: 16,
        };
        assert!(!growing.is_exhausted());

        let idle = PoolStats {
            size: 16,
            idle: 2,
            max: 16,
        };
        assert!(!idle.is_exhausted());
        assert_eq!(idle.in_use(), 14);
    }
}
