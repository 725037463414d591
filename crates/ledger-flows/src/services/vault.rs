//! Vault: estados de efectivo no consumidos que pertenecen al nodo.
//!
//! Los soft locks reservan monedas para un flow entre la selección y la
//! notarización, de modo que dos flows del mismo nodo no elijan la misma
//! moneda. Viven sólo en memoria.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;
use ledger_core::FlowId;
use ledger_domain::{Currency, PublicKey, SecureHash, SignedTransaction, StateAndRef, StateRef};

#[derive(Default)]
struct VaultState {
    unconsumed: IndexMap<StateRef, StateAndRef>,
    locks: HashMap<StateRef, FlowId>,
}

pub struct Vault {
    owner: PublicKey,
    state: Mutex<VaultState>,
}

impl Vault {
    pub fn new(owner: PublicKey) -> Self {
        Self { owner,
               state: Mutex::new(VaultState::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, VaultState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Consume las entradas de `stx` y agrega las salidas propias.
    pub fn record(&self, id: SecureHash, stx: &SignedTransaction) {
        let mut state = self.lock();
        for input in &stx.tx.inputs {
            state.unconsumed.shift_remove(input);
            state.locks.remove(input);
        }
        for (i, output) in stx.tx.outputs.iter().enumerate() {
            if output.data.owner == self.owner {
                let reference = StateRef::new(id, i as u32);
                state.unconsumed.insert(reference,
                                        StateAndRef { state: output.clone(),
                                                      reference });
            }
        }
    }

    /// Estados no consumidos, en orden de llegada.
    pub fn unconsumed(&self) -> Vec<StateAndRef> {
        self.lock().unconsumed.values().cloned().collect()
    }

    pub fn balance(&self, currency: &Currency) -> u64 {
        self.lock()
            .unconsumed
            .values()
            .filter(|s| s.state.data.amount.token.product == *currency)
            .map(|s| s.state.data.amount.quantity)
            .sum()
    }

    /// Monedas de `currency` que `flow` puede usar: libres o ya reservadas
    /// por él.
    pub fn spendable(&self, flow: FlowId, currency: &Currency) -> Vec<StateAndRef> {
        let state = self.lock();
        state.unconsumed
             .values()
             .filter(|s| s.state.data.amount.token.product == *currency)
             .filter(|s| state.locks.get(&s.reference).map_or(true, |owner| *owner == flow))
             .cloned()
             .collect()
    }

    /// Reserva todas las referencias para `flow`, o ninguna si alguna ya
    /// está reservada por otro flow o consumida.
    pub fn soft_lock(&self, flow: FlowId, refs: &[StateRef]) -> bool {
        let mut state = self.lock();
        let available = refs.iter().all(|r| {
                                       state.unconsumed.contains_key(r)
                                       && state.locks.get(r).map_or(true, |owner| *owner == flow)
                                   });
        if !available {
            return false;
        }
        for r in refs {
            state.locks.insert(*r, flow);
        }
        true
    }

    pub fn release(&self, flow: FlowId) {
        self.lock().locks.retain(|_, owner| *owner != flow);
    }

    pub fn locked_by(&self, flow: FlowId) -> Vec<StateRef> {
        self.lock()
            .locks
            .iter()
            .filter(|(_, owner)| **owner == flow)
            .map(|(r, _)| *r)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ledger_domain::{Amount, CashCommand, CashState, Command, Issued, KeyPair, Party, TransactionBuilder,
                        TransactionState};
    use uuid::Uuid;

    use super::*;

    fn issue(owner: &KeyPair, quantities: &[u64]) -> SignedTransaction {
        let bank = KeyPair::from_name("Bank");
        let notary = Party::new("Notary", KeyPair::from_name("Notary").public());
        let token = Issued { issuer: Party::new("Bank", bank.public()).reference(&[1]),
                             product: Currency::new("USD") };
        let mut b = TransactionBuilder::new(Some(notary.clone()));
        for q in quantities {
            b.add_output_state(TransactionState { data: CashState::new(Amount::new(*q, token.clone()), owner.public()),
                                                  notary: notary.clone() });
        }
        b.add_command(Command::new(CashCommand::Issue { nonce: 1 }, [bank.public()]));
        b.sign_with(&[&bank]).unwrap()
    }

    #[test]
    fn records_only_own_outputs_and_consumes_inputs() {
        let alice = KeyPair::from_name("Alice");
        let vault = Vault::new(alice.public());
        let stx = issue(&alice, &[40, 60]);
        let id = stx.id().unwrap();
        vault.record(id, &stx);
        assert_eq!(vault.balance(&Currency::new("USD")), 100);

        let other = Vault::new(KeyPair::from_name("Bob").public());
        other.record(id, &stx);
        assert_eq!(other.balance(&Currency::new("USD")), 0);

        let mut spend = stx.tx.clone();
        spend.inputs = vec![StateRef::new(id, 0)];
        spend.outputs.clear();
        let spend = SignedTransaction { tx: spend, sigs: vec![] };
        vault.record(spend.id().unwrap(), &spend);
        assert_eq!(vault.balance(&Currency::new("USD")), 60);
    }

    #[test]
    fn soft_locks_exclude_other_flows() {
        let alice = KeyPair::from_name("Alice");
        let vault = Vault::new(alice.public());
        let stx = issue(&alice, &[40, 40]);
        let id = stx.id().unwrap();
        vault.record(id, &stx);
        let (f1, f2) = (Uuid::new_v4(), Uuid::new_v4());
        let usd = Currency::new("USD");

        assert!(vault.soft_lock(f1, &[StateRef::new(id, 0)]));
        assert!(!vault.soft_lock(f2, &[StateRef::new(id, 0), StateRef::new(id, 1)]));
        assert_eq!(vault.spendable(f2, &usd).len(), 1);
        assert_eq!(vault.spendable(f1, &usd).len(), 2);

        vault.release(f1);
        assert!(vault.locked_by(f1).is_empty());
        assert!(vault.soft_lock(f2, &[StateRef::new(id, 0), StateRef::new(id, 1)]));
    }
}
