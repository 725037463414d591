//! ledger-flows: flows de efectivo y del notario sobre el engine de
//! `ledger-core`.
//!
//! Todos los flows usan `NodeServices` como servicios del nodo. Los pasos
//! compartidos (notarizar, distribuir la transacción final) son
//! sub-máquinas de estado (`NotaryClient`, `Finality`) que cada flow embebe
//! en su propio estado serializable.
pub mod errors;
pub mod finality;
pub mod flows;
pub mod notary_client;
pub mod services;

use ledger_core::{EngineBuilder, PeerId};
use ledger_domain::Party;

pub use errors::ResultExt;
pub use finality::{Finality, FinalityPayload};
pub use flows::{CashExitFlow, CashIssueFlow, CashPaymentFlow, CashReceiveFlow, ExitRequest, IssueRequest,
                NotariseFlow, NotaryServiceFlow, PaymentRequest, TxResult};
pub use notary_client::NotaryClient;
pub use services::{InMemoryNetworkMap, NetworkMap, NodeServices, TransactionStorage, Vault};

/// Topic de la sesión con el notario.
pub const NOTARY_TOPIC: &str = "notary.request";
/// Topic con el que se distribuye una transacción finalizada.
pub const FINALITY_TOPIC: &str = "cash.finality";

/// Resultado de un paso de una sub-máquina: seguir suspendiendo o terminar.
pub enum Step<T> {
    Action(ledger_core::FlowAction),
    Done(T),
}

pub fn peer_of(party: &Party) -> PeerId {
    PeerId::new(party.name.clone())
}

/// Registra todos los flows del nodo.
pub fn register_flows(builder: EngineBuilder<NodeServices>) -> EngineBuilder<NodeServices> {
    builder.register_initiator::<CashIssueFlow>()
           .register_initiator::<CashPaymentFlow>()
           .register_initiator::<CashExitFlow>()
           .register_initiator::<NotariseFlow>()
           .register_responder::<CashReceiveFlow>()
           .register_responder::<NotaryServiceFlow>()
}
