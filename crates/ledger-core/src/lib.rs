//! ledger-core: motor de flows.
//!
//! Un flow es una máquina de estados explícita (`FlowLogic`) que el engine
//! conduce entre puntos de suspensión (enviar, recibir, esperar una operación
//! externa). Antes de bloquear se persiste un `Checkpoint`; tras un reinicio
//! el engine reconstruye los flows suspendidos a partir de la store.
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod flow;
pub mod hashing;
pub mod messaging;
pub mod progress;
pub mod session;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, FlowStatus, InMemoryCheckpointStore, WaitRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{EngineBuilder, FlowEngine, FlowHandle, FlowInfo, FlowOutcome, FlowResult};
pub use errors::{CheckpointError, FlowError, TransportError};
pub use flow::{FlowAction, FlowContext, FlowLogic, InitiatingFlow, OperationFuture, Outgoing, ResponderFlow, Resume};
pub use messaging::{InMemoryNetwork, MessagingService, PeerId};
pub use progress::{ProgressStream, ProgressTracker};
pub use session::SessionId;

/// Identificador de una instancia de flow.
pub type FlowId = uuid::Uuid;
