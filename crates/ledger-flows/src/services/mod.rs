//! Servicios del nodo visibles para los flows.
mod network_map;
mod storage;
mod vault;

use std::sync::Arc;

use ledger_core::FlowError;
use ledger_domain::{KeyPair, Party, SignedTransaction, StateRef, TransactionState};
use ledger_notary::NotaryService;

pub use network_map::{InMemoryNetworkMap, NetworkMap};
pub use storage::TransactionStorage;
pub use vault::Vault;

pub struct NodeServices {
    identity: Party,
    key: KeyPair,
    network_map: Arc<dyn NetworkMap>,
    vault: Vault,
    transactions: TransactionStorage,
    notary: Option<Arc<NotaryService>>,
}

impl NodeServices {
    pub fn new(name: &str, key: KeyPair, network_map: Arc<dyn NetworkMap>) -> Self {
        let identity = Party::new(name, key.public());
        Self { vault: Vault::new(identity.owning_key),
               identity,
               key,
               network_map,
               transactions: TransactionStorage::new(),
               notary: None }
    }

    /// Nodo que además atiende solicitudes de notarización.
    pub fn with_notary(mut self, service: Arc<NotaryService>) -> Self {
        self.notary = Some(service);
        self
    }

    pub fn identity(&self) -> &Party {
        &self.identity
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    pub fn network_map(&self) -> &Arc<dyn NetworkMap> {
        &self.network_map
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn transactions(&self) -> &TransactionStorage {
        &self.transactions
    }

    pub fn notary_service(&self) -> Option<&Arc<NotaryService>> {
        self.notary.as_ref()
    }

    pub fn party(&self, name: &str) -> Result<Party, FlowError> {
        self.network_map
            .party(name)
            .ok_or_else(|| FlowError::UnexpectedInput(format!("unknown party {name}")))
    }

    /// Primer notario anunciado en el mapa de red.
    pub fn default_notary(&self) -> Result<Party, FlowError> {
        self.network_map
            .notaries()
            .into_iter()
            .next()
            .ok_or_else(|| FlowError::UnexpectedInput("no notary in the network map".into()))
    }

    /// Guarda la transacción y actualiza el vault. Registrar dos veces la
    /// misma transacción no tiene efecto; devuelve si era nueva.
    pub fn record_transaction(&self, stx: &SignedTransaction) -> Result<bool, FlowError> {
        let id = stx.id().map_err(|e| FlowError::Serialization(e.to_string()))?;
        if !self.transactions.add(id, stx.clone()) {
            return Ok(false);
        }
        self.vault.record(id, stx);
        log::info!("node.record_transaction node={} tx={} inputs={} outputs={}",
                   self.identity,
                   id.short(),
                   stx.tx.inputs.len(),
                   stx.tx.outputs.len());
        Ok(true)
    }

    /// Resuelve una salida a partir de las transacciones guardadas.
    pub fn resolve(&self, state: &StateRef) -> Option<TransactionState> {
        self.transactions.output(state)
    }
}
