use ledger_contracts::generate_issue;
use ledger_core::{FlowAction, FlowContext, FlowError, FlowLogic, InitiatingFlow, Resume};
use ledger_domain::{Amount, Currency, Issued, OpaqueBytes, TransactionBuilder};
use serde::{Deserialize, Serialize};

use super::{finish, verify_and_sign, DONE, FINALISING, SIGNING};
use crate::finality::Finality;
use crate::services::NodeServices;

const GENERATING: &str = "generating";

fn default_issuer_ref() -> OpaqueBytes {
    OpaqueBytes(vec![1])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRequest {
    pub amount: u64,
    pub currency: String,
    /// Nombre del dueño de la emisión; puede ser el propio emisor.
    pub recipient: String,
    #[serde(default = "default_issuer_ref")]
    pub issuer_ref: OpaqueBytes,
}

/// Emite efectivo respaldado por este nodo.
#[derive(Debug, Serialize, Deserialize)]
pub struct CashIssueFlow {
    request: IssueRequest,
    /// Fijado al crear el flow; sobrevive a reinicios con el checkpoint.
    nonce: u64,
    finality: Option<Finality>,
}

impl CashIssueFlow {
    pub fn new(request: IssueRequest) -> Self {
        Self { request,
               nonce: rand::random(),
               finality: None }
    }
}

impl FlowLogic<NodeServices> for CashIssueFlow {
    fn progress_steps(&self) -> &'static [&'static str] {
        &[GENERATING, SIGNING, FINALISING, DONE]
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_, NodeServices>, input: Resume) -> Result<FlowAction, FlowError> {
        if let Some(finality) = self.finality.as_mut() {
            let step = finality.resume(ctx, input)?;
            return finish(ctx, step);
        }
        if !matches!(input, Resume::Start) {
            return Err(FlowError::UnexpectedInput(format!("issue expected start, got {}", input.kind())));
        }
        ctx.progress_to(GENERATING)?;
        let (builder, recipient) = {
            let services = ctx.services();
            let recipient = services.party(&self.request.recipient)?;
            let notary = services.default_notary()?;
            let token = Issued { issuer: services.identity().reference(&self.request.issuer_ref.0),
                                 product: Currency::new(self.request.currency.as_str()) };
            let mut builder = TransactionBuilder::new(Some(notary.clone()));
            generate_issue(&mut builder,
                           Amount::new(self.request.amount, token),
                           recipient.owning_key,
                           notary,
                           self.nonce);
            (builder, recipient)
        };
        ctx.progress_to(SIGNING)?;
        let stx = verify_and_sign(ctx, &builder)?;
        ctx.progress_to(FINALISING)?;
        let mut finality = Finality::new(stx, vec![recipient])?;
        let step = finality.start(ctx)?;
        self.finality = Some(finality);
        finish(ctx, step)
    }
}

impl InitiatingFlow<NodeServices> for CashIssueFlow {
    const LOGIC_TYPE: &'static str = "cash.issue";
    type Args = IssueRequest;

    fn from_args(args: IssueRequest) -> Result<Self, FlowError> {
        Ok(Self::new(args))
    }
}
