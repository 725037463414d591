use dashmap::DashMap;
use ledger_domain::{SecureHash, SignedTransaction, StateRef, TransactionState};

/// Transacciones conocidas por el nodo, indexadas por id.
#[derive(Default)]
pub struct TransactionStorage {
    txs: DashMap<SecureHash, SignedTransaction>,
}

impl TransactionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` si ya estaba guardada.
    pub fn add(&self, id: SecureHash, stx: SignedTransaction) -> bool {
        match self.txs.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(stx);
                true
            }
        }
    }

    pub fn get(&self, id: &SecureHash) -> Option<SignedTransaction> {
        self.txs.get(id).map(|t| t.value().clone())
    }

    pub fn output(&self, state: &StateRef) -> Option<TransactionState> {
        self.txs.get(&state.txhash)?.tx.outputs.get(state.index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}
