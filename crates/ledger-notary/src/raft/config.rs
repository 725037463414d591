use std::time::Duration;

use once_cell::sync::Lazy;

static DOTENV: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

fn env_u64(key: &str, default: u64) -> u64 {
    Lazy::force(&DOTENV);
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Temporización de las réplicas, medida en ticks.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub tick: Duration,
    pub heartbeat_ticks: u32,
    pub election_ticks_min: u32,
    pub election_ticks_max: u32,
    /// Espera máxima por el commit de una solicitud antes de reintentar.
    pub request_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self { tick: Duration::from_millis(10),
               heartbeat_ticks: 2,
               election_ticks_min: 10,
               election_ticks_max: 20,
               request_timeout: Duration::from_millis(500),
               max_attempts: 20 }
    }
}

impl RaftConfig {
    /// `RAFT_TICK_MS`, `RAFT_HEARTBEAT_TICKS`, `RAFT_ELECTION_TICKS_MIN`,
    /// `RAFT_ELECTION_TICKS_MAX`, `RAFT_REQUEST_TIMEOUT_MS`, `RAFT_MAX_ATTEMPTS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let min = env_u64("RAFT_ELECTION_TICKS_MIN", d.election_ticks_min as u64) as u32;
        let max = env_u64("RAFT_ELECTION_TICKS_MAX", d.election_ticks_max as u64) as u32;
        Self { tick: Duration::from_millis(env_u64("RAFT_TICK_MS", d.tick.as_millis() as u64)),
               heartbeat_ticks: env_u64("RAFT_HEARTBEAT_TICKS", d.heartbeat_ticks as u64).max(1) as u32,
               election_ticks_min: min.max(1),
               election_ticks_max: max.max(min.max(1)),
               request_timeout: Duration::from_millis(env_u64("RAFT_REQUEST_TIMEOUT_MS",
                                                              d.request_timeout.as_millis() as u64)),
               max_attempts: env_u64("RAFT_MAX_ATTEMPTS", d.max_attempts as u64).max(1) as u32 }
    }
}
