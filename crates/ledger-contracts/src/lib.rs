//! ledger-contracts: verificación de transacciones por cláusulas y selección
//! de monedas para activos fungibles.
pub mod cash;
pub mod clauses;
pub mod errors;
pub mod selection;

pub use cash::CashContract;
pub use clauses::{verify_clause, AllOf, AnyOf, Clause, FirstOf, GroupClauseVerifier, InOutGroup};
pub use errors::VerificationError;
pub use selection::{generate_exit, generate_issue, generate_spend, InsufficientBalance, SelectionError};
