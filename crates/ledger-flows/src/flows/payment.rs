use ledger_core::{FlowAction, FlowContext, FlowError, FlowLogic, InitiatingFlow, Resume};
use ledger_domain::{Amount, Currency};
use serde::{Deserialize, Serialize};

use super::{finish, select_and_lock, verify_and_sign, DONE, FINALISING, SELECTING, SIGNING};
use crate::finality::Finality;
use crate::services::NodeServices;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: u64,
    pub currency: String,
    pub recipient: String,
}

/// Paga efectivo del vault a otra parte. El cambio vuelve al dueño de la
/// primera moneda seleccionada.
#[derive(Debug, Serialize, Deserialize)]
pub struct CashPaymentFlow {
    request: PaymentRequest,
    finality: Option<Finality>,
}

impl CashPaymentFlow {
    pub fn new(request: PaymentRequest) -> Self {
        Self { request,
               finality: None }
    }
}

impl FlowLogic<NodeServices> for CashPaymentFlow {
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
            return Err(FlowError::UnexpectedInput(format!("payment expected start, got {}", input.kind())));
        }
        ctx.progress_to(SELECTING)?;
        let recipient = ctx.services().party(&self.request.recipient)?;
        let amount = Amount::new(self.request.amount, Currency::new(self.request.currency.as_str()));
        let builder = select_and_lock(ctx, &amount, recipient.owning_key)?;
        ctx.progress_to(SIGNING)?;
        let stx = verify_and_sign(ctx, &builder)?;
        ctx.progress_to(FINALISING)?;
        let mut finality = Finality::new(stx, vec![recipient])?;
        let step = finality.start(ctx)?;
        self.finality = Some(finality);
        finish(ctx, step)
    }

    fn on_failure(&mut self, ctx: &mut FlowContext<'_, NodeServices>, error: &FlowError) {
        log::warn!("cash.payment:failed flow_id={} error={error}", ctx.flow_id());
        ctx.services().vault().release(ctx.flow_id());
    }
}

impl InitiatingFlow<NodeServices> for CashPaymentFlow {
    const LOGIC_TYPE: &'static str = "cash.payment";
    type Args = PaymentRequest;

    fn from_args(args: PaymentRequest) -> Result<Self, FlowError> {
        if args.amount == 0 {
            return Err(FlowError::UnexpectedInput("payment amount must be positive".into()));
        }
        Ok(Self::new(args))
    }
}
