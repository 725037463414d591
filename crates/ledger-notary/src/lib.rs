//! ledger-notary: servicio notarial de unicidad de entradas.
//!
//! El notario mantiene un log de commits `StateRef → transacción consumidora`
//! y responde a cada solicitud con su firma o con un conflicto. El log vive
//! detrás de `UniquenessProvider`, con una implementación en un solo nodo y
//! otra replicada sobre Raft.
pub mod commit_log;
pub mod errors;
pub mod raft;
pub mod request;
pub mod service;
pub mod uniqueness;

pub use commit_log::{CommitEntry, CommitLog, CommitOutcome, CommitRequest};
pub use errors::NotaryError;
pub use raft::{RaftCluster, RaftConfig, RaftUniquenessProvider};
pub use request::{NotarisationRequest, NotarisationResponse};
pub use service::NotaryService;
pub use uniqueness::{InMemoryUniquenessProvider, UniquenessProvider};
