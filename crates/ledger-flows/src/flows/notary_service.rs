use ledger_core::{FlowAction, FlowContext, FlowError, FlowLogic, PeerId, ResponderFlow, Resume, SessionId};
use ledger_notary::{NotarisationRequest, NotarisationResponse, NotaryError};
use serde::{Deserialize, Serialize};

use crate::services::NodeServices;
use crate::NOTARY_TOPIC;

/// Lado notario de la sesión: recibe la solicitud, la compromete a través
/// del `NotaryService` del nodo y responde.
///
/// El commit corre como operación externa; si el nodo se reinicia mientras
/// espera, la solicitud se vuelve a comprometer, lo que es idempotente para
/// el mismo id de transacción.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotaryServiceFlow {
    session: SessionId,
    requester: PeerId,
    request: Option<NotarisationRequest>,
    responded: bool,
}

impl NotaryServiceFlow {
    fn commit(&self, ctx: &FlowContext<'_, NodeServices>) -> Result<FlowAction, FlowError> {
        let Some(request) = self.request.clone() else {
            return Err(FlowError::UnexpectedInput("no notarisation request received".into()));
        };
        let Some(service) = ctx.services().notary_service().cloned() else {
            let response = NotarisationResponse::Rejected(NotaryError::Unavailable(format!("{} is not a notary",
                                                                                          ctx.our_identity())));
            return FlowAction::send(self.session, &response);
        };
        let now = ctx.now();
        log::debug!("notary.service:commit flow_id={} requester={} tx={}",
                    ctx.flow_id(),
                    self.requester,
                    request.tx_id.short());
        Ok(FlowAction::await_operation(async move {
            let response = service.respond(&request, now).await;
            Ok(serde_json::to_value(response)?)
        }))
    }
}

impl FlowLogic<NodeServices> for NotaryServiceFlow {
    fn resume(&mut self, ctx: &mut FlowContext<'_, NodeServices>, input: Resume) -> Result<FlowAction, FlowError> {
        match input {
            Resume::Start => Ok(FlowAction::receive(self.session, None)),
            Resume::Received { .. } => {
                let (_, request): (SessionId, NotarisationRequest) = input.into_message()?;
                self.request = Some(request);
                self.commit(ctx)
            }
            Resume::OperationInterrupted => self.commit(ctx),
            Resume::OperationCompleted(result) => {
                let response: NotarisationResponse = serde_json::from_value(result?)?;
                self.responded = true;
                FlowAction::send(self.session, &response)
            }
            Resume::Sent => FlowAction::complete(&self.responded),
            Resume::Failed { error, .. } => Err(error),
        }
    }
}

impl ResponderFlow<NodeServices> for NotaryServiceFlow {
    const LOGIC_TYPE: &'static str = "notary.service";
    const INITIATED_BY: &'static str = NOTARY_TOPIC;

    fn on_initiated(session: SessionId, counterparty: &PeerId) -> Self {
        Self { session,
               requester: counterparty.clone(),
               request: None,
               responded: false }
    }
}
