use ledger_core::{FlowAction, FlowContext, FlowError, FlowLogic, InitiatingFlow, Resume};
use ledger_domain::SignedTransaction;
use serde::{Deserialize, Serialize};

use super::TxResult;
use crate::notary_client::NotaryClient;
use crate::services::NodeServices;
use crate::Step;

const REQUESTING: &str = "requesting";
const NOTARISED: &str = "notarised";

/// Notariza una transacción ya firmada sin registrarla ni distribuirla.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotariseFlow {
    client: NotaryClient,
}

impl FlowLogic<NodeServices> for NotariseFlow {
    fn progress_steps(&self) -> &'static [&'static str] {
        &[REQUESTING, NOTARISED]
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_, NodeServices>, input: Resume) -> Result<FlowAction, FlowError> {
        let step = match input {
            Resume::Start => {
                ctx.progress_to(REQUESTING)?;
                Step::Action(self.client.start(ctx)?)
            }
            other => self.client.resume(ctx, other)?,
        };
        match step {
            Step::Action(action) => Ok(action),
            Step::Done(stx) => {
                ctx.progress_to(NOTARISED)?;
                FlowAction::complete(&TxResult::of(stx)?)
            }
        }
    }
}

impl InitiatingFlow<NodeServices> for NotariseFlow {
    const LOGIC_TYPE: &'static str = "notary.notarise";
    type Args = SignedTransaction;

    fn from_args(stx: SignedTransaction) -> Result<Self, FlowError> {
        let notary = stx.tx
                        .notary
                        .clone()
                        .ok_or_else(|| FlowError::UnexpectedInput("transaction has no notary".into()))?;
        Ok(Self { client: NotaryClient::new(stx, notary) })
    }
}
