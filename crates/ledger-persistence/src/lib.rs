//! ledger-persistence
//!
//! Backend Postgres (Diesel + r2d2) para las dos piezas durables del nodo:
//! - `PgCheckpointStore`: checkpoints de flows (`flow_checkpoints`).
//! - `PgUniquenessProvider`: log de commits del notario de un solo nodo
//!   (`notary_commit_log`).
//!
//! Además `FileRaftStorage`, el log y estado duro de cada réplica del notario
//! replicado, en archivos.
//!
//! Las migraciones se embeben y se ejecutan al construir el pool.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod raft_log;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgCheckpointStore, PgPool,
             PgUniquenessProvider, PoolProvider};
pub use raft_log::FileRaftStorage;
