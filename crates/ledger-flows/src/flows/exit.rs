use ledger_contracts::generate_exit;
use ledger_core::{FlowAction, FlowContext, FlowError, FlowLogic, InitiatingFlow, Resume};
use ledger_domain::{Amount, Currency, Issued, OpaqueBytes, StateRef, TransactionBuilder};
use serde::{Deserialize, Serialize};

use super::{finish, verify_and_sign, DONE, FINALISING, SELECTING, SIGNING};
use crate::errors::ResultExt;
use crate::finality::Finality;
use crate::services::NodeServices;

fn default_issuer_ref() -> OpaqueBytes {
    OpaqueBytes(vec![1])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRequest {
    pub amount: u64,
    pub currency: String,
    #[serde(default = "default_issuer_ref")]
    pub issuer_ref: OpaqueBytes,
}

/// Retira del ledger efectivo emitido por este nodo y que este nodo posee.
#[derive(Debug, Serialize, Deserialize)]
pub struct CashExitFlow {
    request: ExitRequest,
    finality: Option<Finality>,
}

impl CashExitFlow {
    pub fn new(request: ExitRequest) -> Self {
        Self { request,
               finality: None }
    }
}

impl FlowLogic<NodeServices> for CashExitFlow {
    fn progress_steps(&self) -> &'static [&'static str] {
        &[SELECTING, SIGNING, FINALISING, DONE]
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_, NodeServices>, input: Resume) -> Result<FlowAction, FlowError> {
        if let Some(finality) = self.finality.as_mut() {
            let step = finality.resume(ctx, input)?;
            if matches!(step, crate::Step::Done(_)) {
                ctx.services().vault().release(ctx.flow_id());
            }
            return finish(ctx, step);
        }
        if !matches!(input, Resume::Start) {
            return Err(FlowError::UnexpectedInput(format!("exit expected start, got {}", input.kind())));
        }
        ctx.progress_to(SELECTING)?;
        let builder = {
            let services = ctx.services();
            let currency = Currency::new(self.request.currency.as_str());
            let token = Issued { issuer: services.identity().reference(&self.request.issuer_ref.0),
                                 product: currency.clone() };
            let candidates = services.vault().spendable(ctx.flow_id(), &currency);
            let mut builder = TransactionBuilder::new(None);
            generate_exit(&mut builder, &Amount::new(self.request.amount, token), &candidates).into_flow()?;
            let refs: Vec<StateRef> = builder.inputs().iter().map(|s| s.reference).collect();
            if !services.vault().soft_lock(ctx.flow_id(), &refs) {
                return Err(FlowError::Internal("selected coins are reserved by concurrent flows".into()));
            }
            builder
        };
        ctx.progress_to(SIGNING)?;
        let stx = verify_and_sign(ctx, &builder)?;
        ctx.progress_to(FINALISING)?;
        let mut finality = Finality::new(stx, vec![])?;
        let step = finality.start(ctx)?;
        self.finality = Some(finality);
        finish(ctx, step)
    }

    fn on_failure(&mut self, ctx: &mut FlowContext<'_, NodeServices>, _error: &FlowError) {
        ctx.services().vault().release(ctx.flow_id());
    }
}

impl InitiatingFlow<NodeServices> for CashExitFlow {
    const LOGIC_TYPE: &'static str = "cash.exit";
    type Args = ExitRequest;

    fn from_args(args: ExitRequest) -> Result<Self, FlowError> {
        Ok(Self::new(args))
    }
}
