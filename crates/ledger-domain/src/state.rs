use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::amount::{Amount, Currency, Issued};
use crate::crypto::{PublicKey, SecureHash};
use crate::identity::Party;

/// Puntero inmutable a la salida `index` de la transacción `txhash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    pub txhash: SecureHash,
    pub index: u32,
}

impl StateRef {
    pub fn new(txhash: SecureHash, index: u32) -> Self {
        Self { txhash, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.txhash, self.index)
    }
}

/// Efectivo emitido por un emisor y poseído por `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CashState {
    pub amount: Amount<Issued<Currency>>,
    pub owner: PublicKey,
}

impl CashState {
    pub fn new(amount: Amount<Issued<Currency>>, owner: PublicKey) -> Self {
        Self { amount, owner }
    }

    /// Claves que deben firmar para retirar este estado del ledger: el dueño
    /// y el emisor.
    pub fn exit_keys(&self) -> BTreeSet<PublicKey> {
        BTreeSet::from([self.owner, self.amount.token.issuer.party.owning_key])
    }

    pub fn with_owner(&self, owner: PublicKey) -> Self {
        Self { amount: self.amount.clone(),
               owner }
    }

    pub fn with_amount(&self, amount: Amount<Issued<Currency>>) -> Self {
        Self { amount,
               owner: self.owner }
    }
}

/// Estado + notario que controla su consumo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionState {
    pub data: CashState,
    pub notary: Party,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateAndRef {
    pub state: TransactionState,
    pub reference: StateRef,
}
