#![allow(dead_code)]
use ledger_domain::{Amount, CashState, Currency, Issued, KeyPair, Party, SecureHash, StateAndRef, StateRef,
                    TransactionState};

pub struct Fixture {
    pub bank: KeyPair,
    pub other_bank: KeyPair,
    pub alice: KeyPair,
    pub bob: KeyPair,
    pub notary: Party,
}

impl Fixture {
    pub fn new() -> Self {
        Self { bank: KeyPair::from_name("Bank"),
               other_bank: KeyPair::from_name("OtherBank"),
               alice: KeyPair::from_name("Alice"),
               bob: KeyPair::from_name("Bob"),
               notary: Party::new("Notary", KeyPair::from_name("Notary").public()) }
    }

    pub fn usd_from(&self, issuer: &KeyPair, name: &str) -> Issued<Currency> {
        Issued { issuer: Party::new(name, issuer.public()).reference(&[1]),
                 product: Currency::new("USD") }
    }

    pub fn usd(&self) -> Issued<Currency> {
        self.usd_from(&self.bank, "Bank")
    }

    pub fn coin(&self, seed: u8, quantity: u64, token: Issued<Currency>, owner: &KeyPair) -> StateAndRef {
        StateAndRef { state: TransactionState { data: CashState::new(Amount::new(quantity, token), owner.public()),
                                                notary: self.notary.clone() },
                      reference: StateRef::new(SecureHash::sha256(&[seed]), 0) }
    }
}

pub fn dollars(q: u64) -> Amount<Currency> {
    Amount::new(q, Currency::new("USD"))
}
