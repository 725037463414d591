//! Configuración de un nodo: nombre, dónde guarda checkpoints y cómo se
//! respalda su notario. Se lee del entorno (`.env` vía dotenvy).
use std::env;
use std::path::PathBuf;

use ledger_core::EngineConfig;
use ledger_notary::RaftConfig;
use once_cell::sync::Lazy;

use crate::errors::AppError;

static DOTENV: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

/// Dónde persiste el engine sus checkpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointBackend {
    Memory,
    /// Un archivo JSON por flow bajo `<dir>/<nodo>/checkpoints`.
    Dir(PathBuf),
    Postgres,
}

/// Respaldo del log de commits cuando el nodo es notario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotaryMode {
    Single,
    Postgres,
    Raft { cluster_size: u64 },
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub checkpoints: CheckpointBackend,
    pub notary: NotaryMode,
    pub engine: EngineConfig,
    pub raft: RaftConfig,
}

impl NodeConfig {
    /// Nodo con defaults: checkpoints en memoria y notario de un solo nodo.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               checkpoints: CheckpointBackend::Memory,
               notary: NotaryMode::Single,
               engine: EngineConfig::default(),
               raft: RaftConfig::default() }
    }

    pub fn with_checkpoints(mut self, backend: CheckpointBackend) -> Self {
        self.checkpoints = backend;
        self
    }

    pub fn with_notary(mut self, mode: NotaryMode) -> Self {
        self.notary = mode;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// `LEDGER_NODE_NAME`, `LEDGER_DATA_DIR` (o `LEDGER_CHECKPOINTS=postgres`),
    /// `LEDGER_NOTARY_MODE` (`single`, `postgres`, `raft`) y
    /// `LEDGER_RAFT_CLUSTER_SIZE`. El engine y Raft leen sus propias variables.
    pub fn from_env() -> Result<Self, AppError> {
        Lazy::force(&DOTENV);
        let name = env::var("LEDGER_NODE_NAME").unwrap_or_else(|_| "Node".into());
        let checkpoints = match env::var("LEDGER_CHECKPOINTS").ok().as_deref() {
            Some("postgres") => CheckpointBackend::Postgres,
            Some("memory") => CheckpointBackend::Memory,
            Some(other) => return Err(AppError::Config(format!("LEDGER_CHECKPOINTS desconocido: {other}"))),
            None => match env::var("LEDGER_DATA_DIR") {
                Ok(dir) => CheckpointBackend::Dir(PathBuf::from(dir)),
                Err(_) => CheckpointBackend::Memory,
            },
        };
        let cluster_size = match env::var("LEDGER_RAFT_CLUSTER_SIZE") {
            Ok(v) => v.parse::<u64>()
                      .map_err(|e| AppError::Config(format!("LEDGER_RAFT_CLUSTER_SIZE={v}: {e}")))?,
            Err(_) => 3,
        };
        let notary = parse_notary_mode(&env::var("LEDGER_NOTARY_MODE").unwrap_or_else(|_| "single".into()),
                                       cluster_size)?;
        Ok(Self { name,
                  checkpoints,
                  notary,
                  engine: EngineConfig::from_env(),
                  raft: RaftConfig::from_env() })
    }
}

pub fn parse_notary_mode(raw: &str, cluster_size: u64) -> Result<NotaryMode, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "single" => Ok(NotaryMode::Single),
        "postgres" | "pg" => Ok(NotaryMode::Postgres),
        "raft" if cluster_size == 0 => Err(AppError::Config("raft cluster needs at least one replica".into())),
        "raft" => Ok(NotaryMode::Raft { cluster_size }),
        other => Err(AppError::Config(format!("unknown notary mode: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notary_mode_parsing() {
        assert_eq!(parse_notary_mode("RAFT", 5).unwrap(), NotaryMode::Raft { cluster_size: 5 });
        assert_eq!(parse_notary_mode("pg", 3).unwrap(), NotaryMode::Postgres);
        assert!(parse_notary_mode("raft", 0).is_err());
        assert!(matches!(parse_notary_mode("paxos", 3), Err(AppError::Config(_))));
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = NodeConfig::named("Alice").with_notary(NotaryMode::Raft { cluster_size: 3 })
                                            .with_checkpoints(CheckpointBackend::Dir("/tmp/x".into()));
        assert_eq!(cfg.name, "Alice");
        assert_eq!(cfg.checkpoints, CheckpointBackend::Dir("/tmp/x".into()));
        assert_eq!(cfg.engine.notary_retries, 3);
    }
}
