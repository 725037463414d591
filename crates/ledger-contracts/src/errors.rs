use ledger_domain::DomainError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum VerificationError {
    #[error("no input for group {token}; a move or exit requires at least one asset input")]
    NoInputs { token: String },
    #[error("zero sized input in group {token}")]
    ZeroSizedInput { token: String },
    #[error("amounts do not balance for {token}: inputs={inputs} outputs={outputs} exited={exited}")]
    AmountMismatch {
        token: String,
        inputs: u64,
        outputs: u64,
        exited: u64,
    },
    #[error("no move or exit command matches the inputs of group {token}")]
    MissingMoveOrExit { token: String },
    #[error("move command is not signed by every input owner: missing {missing:?}")]
    MissingMoveSignature { missing: Vec<String> },
    #[error("exit command is not signed by every exit key: missing {missing:?}")]
    MissingExitSignature { missing: Vec<String> },
    #[error("issue command is not signed by issuer {issuer}")]
    MissingIssuerSignature { issuer: String },
    #[error("issue must increase the supply of {token}")]
    IssueDoesNotIncrease { token: String },
    #[error("exactly one issue command expected, found {0}")]
    IssueCommandCount(usize),
    #[error("no clause matched in composition")]
    NoClauseMatched,
    #[error("clause {0} did not match the commands present")]
    ClauseNotMatched(String),
    #[error("clause {0} must be the last clause of its composition")]
    ClauseOrdering(String),
    #[error("grouped clause invoked without a grouping key")]
    MissingGroupingKey,
    #[error("commands not matched by any clause: {0:?}")]
    UnmatchedCommands(Vec<String>),
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}
