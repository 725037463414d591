//! Flows concretos del nodo.
mod exit;
mod issue;
mod notarise;
mod notary_service;
mod payment;
mod receive;

use ledger_contracts::{generate_spend, CashContract};
use ledger_core::{FlowAction, FlowContext, FlowError};
use ledger_domain::{Amount, Currency, PublicKey, SecureHash, SignedTransaction, StateRef, TransactionBuilder};
use serde::{Deserialize, Serialize};

use crate::errors::ResultExt;
use crate::services::NodeServices;
use crate::Step;

pub use exit::{CashExitFlow, ExitRequest};
pub use issue::{CashIssueFlow, IssueRequest};
pub use notarise::NotariseFlow;
pub use notary_service::NotaryServiceFlow;
pub use payment::{CashPaymentFlow, PaymentRequest};
pub use receive::CashReceiveFlow;

pub(crate) const SELECTING: &str = "selecting";
pub(crate) const SIGNING: &str = "signing";
pub(crate) const FINALISING: &str = "finalising";
pub(crate) const DONE: &str = "done";

const LOCK_ATTEMPTS: u32 = 3;

/// Resultado de los flows que producen una transacción.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub tx_id: SecureHash,
    pub transaction: SignedTransaction,
}

impl TxResult {
    pub fn of(stx: SignedTransaction) -> Result<Self, FlowError> {
        Ok(Self { tx_id: stx.id().into_flow()?,
                  transaction: stx })
    }
}

/// Verifica el contrato sobre la transacción construida y la firma con la
/// clave del nodo.
pub(crate) fn verify_and_sign(ctx: &FlowContext<'_, NodeServices>,
                              builder: &TransactionBuilder)
                              -> Result<SignedTransaction, FlowError> {
    let ltx = builder.to_ledger_transaction().into_flow()?;
    CashContract::verify(&ltx).into_flow()?;
    builder.sign_with(&[ctx.services().key()]).into_flow()
}

/// Selecciona monedas para pagar `amount` a `to` y las reserva para el flow.
/// Si otro flow reservó alguna entre la selección y la reserva, se vuelve a
/// seleccionar.
pub(crate) fn select_and_lock(ctx: &FlowContext<'_, NodeServices>,
                              amount: &Amount<Currency>,
                              to: PublicKey)
                              -> Result<TransactionBuilder, FlowError> {
    let vault = ctx.services().vault();
    for attempt in 1..=LOCK_ATTEMPTS {
        let candidates = vault.spendable(ctx.flow_id(), &amount.token);
        let mut builder = TransactionBuilder::new(None);
        let spend = generate_spend(&mut builder, amount, to, &candidates).into_flow()?;
        let refs: Vec<StateRef> = spend.gathered.iter().map(|s| s.reference).collect();
        if vault.soft_lock(ctx.flow_id(), &refs) {
            return Ok(builder);
        }
        log::debug!("select_and_lock:contended flow_id={} attempt={attempt}", ctx.flow_id());
    }
    Err(FlowError::Internal("selected coins are reserved by concurrent flows".into()))
}

/// Traduce un paso de `Finality` a la acción del flow; al terminar completa
/// con `TxResult`.
pub(crate) fn finish(ctx: &FlowContext<'_, NodeServices>,
                     step: Step<SignedTransaction>)
                     -> Result<FlowAction, FlowError> {
    match step {
        Step::Action(action) => Ok(action),
        Step::Done(stx) => {
            ctx.progress_to(DONE)?;
            FlowAction::complete(&TxResult::of(stx)?)
        }
    }
}
