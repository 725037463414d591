//! Configuración del engine leída de entorno (`.env` vía dotenvy).
use std::time::Duration;

use once_cell::sync::Lazy;

static DOTENV: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

fn env_u64(key: &str, default: u64) -> u64 {
    Lazy::force(&DOTENV);
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline por defecto para `receive` en los flows que no fijan uno.
    pub receive_timeout: Duration,
    /// Reintentos de notarización ante timeout antes de fallar el flow.
    pub notary_retries: u32,
    /// Flows terminados que siguen visibles en `list_flows` y `handle`.
    pub finished_retention: usize,
    /// Sesiones cerradas recordadas para descartar reentregas tardías.
    pub closed_session_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { receive_timeout: Duration::from_secs(30),
               notary_retries: 3,
               finished_retention: 1024,
               closed_session_retention: 4096 }
    }
}

impl EngineConfig {
    /// `ENGINE_RECEIVE_TIMEOUT_MS`, `ENGINE_NOTARY_RETRIES`,
    /// `ENGINE_FINISHED_RETENTION`, `ENGINE_CLOSED_SESSION_RETENTION`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self { receive_timeout: Duration::from_millis(env_u64("ENGINE_RECEIVE_TIMEOUT_MS",
                                                              d.receive_timeout.as_millis() as u64)),
               notary_retries: env_u64("ENGINE_NOTARY_RETRIES", d.notary_retries as u64) as u32,
               finished_retention: env_u64("ENGINE_FINISHED_RETENTION", d.finished_retention as u64) as usize,
               closed_session_retention: env_u64("ENGINE_CLOSED_SESSION_RETENTION",
                                                 d.closed_session_retention as u64) as usize }
    }
}
