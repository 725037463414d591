//! ledgerflow: ensamblado de nodos del ledger.
//!
//! Une el motor de flows (`ledger-core`), los flows de efectivo
//! (`ledger-flows`), el notario (`ledger-notary`) y la persistencia Postgres
//! (`ledger-persistence`) en nodos que comparten una red en memoria.
pub mod config;
pub mod errors;
pub mod node;

pub use config::{CheckpointBackend, NodeConfig, NotaryMode};
pub use errors::AppError;
pub use node::{LocalNetwork, Node};
