//! ledger-domain: modelo del ledger (identidades, hashes, montos, estados y
//! transacciones). No conoce el motor de flows ni el notario.
pub mod amount;
pub mod crypto;
pub mod errors;
pub mod hashing;
pub mod identity;
pub mod state;
pub mod transaction;

pub use amount::{Amount, AmountSum, Currency, Issued};
pub use crypto::{DigitalSignature, KeyPair, PublicKey, SecureHash};
pub use errors::DomainError;
pub use identity::{OpaqueBytes, Party, PartyAndReference};
pub use state::{CashState, StateAndRef, StateRef, TransactionState};
pub use transaction::{CashCommand, Command, CommandKind, LedgerTransaction, SignedTransaction, TimeWindow,
                      TransactionBuilder, TransactionSignature, WireTransaction};
