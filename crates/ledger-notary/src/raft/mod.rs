//! Notario replicado sobre Raft.
//!
//! `RaftNode` es la máquina de estados del protocolo, sin E/S: recibe ticks y
//! mensajes y devuelve las acciones a ejecutar. `RaftCluster` conduce un
//! conjunto de réplicas como tareas tokio conectadas por `RaftNetwork`, y
//! `RaftUniquenessProvider` enruta las solicitudes al líder.
//!
//! Cada entrada lleva el término del líder que la creó. Un líder sólo avanza
//! el índice de commit con entradas de su propio término replicadas en una
//! mayoría, y la decisión de conflicto se toma al aplicar la entrada
//! comprometida, así que el orden del log decide quién gana.
mod cluster;
mod config;
mod message;
mod node;
mod provider;
mod storage;

pub use cluster::{RaftCluster, RaftNetwork, ReplicaStatus, StorageOpener};
pub use config::RaftConfig;
pub use message::{EntryPayload, LogEntry, LogIndex, NodeId, RaftMessage, Term};
pub use node::{RaftNode, RaftOutput, Role};
pub use provider::RaftUniquenessProvider;
pub use storage::{HardState, MemRaftStorage, RaftError, RaftStorage};
