//! Sub-máquina cliente del notario.
//!
//! Envía la solicitud por una sesión nueva con el notario y espera la
//! respuesta con el deadline por defecto del engine. Ante timeout reintenta
//! con otra sesión y el mismo id de transacción; el notario trata el
//! reintento de una solicitud ya comprometida como replay y devuelve la
//! misma firma.
use ledger_core::{FlowAction, FlowContext, FlowError, Resume, SessionId};
use ledger_domain::{Party, SignedTransaction, TransactionSignature};
use ledger_notary::{NotarisationRequest, NotarisationResponse};
use serde::{Deserialize, Serialize};

use crate::errors::ResultExt;
use crate::services::NodeServices;
use crate::{peer_of, Step, NOTARY_TOPIC};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotaryClient {
    stx: SignedTransaction,
    notary: Party,
    session: Option<SessionId>,
    attempts: u32,
}

impl NotaryClient {
    pub fn new(stx: SignedTransaction, notary: Party) -> Self {
        Self { stx,
               notary,
               session: None,
               attempts: 0 }
    }

    /// Una transacción necesita notario si consume estados o tiene ventana
    /// de tiempo.
    pub fn needs_notary(stx: &SignedTransaction) -> bool {
        !stx.tx.inputs.is_empty() || stx.tx.time_window.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn start(&mut self, ctx: &mut FlowContext<'_, NodeServices>) -> Result<FlowAction, FlowError> {
        self.stx.verify_signatures_except(&[self.notary.owning_key]).into_flow()?;
        self.send_request(ctx)
    }

    fn send_request(&mut self, ctx: &mut FlowContext<'_, NodeServices>) -> Result<FlowAction, FlowError> {
        let tx_id = self.stx.id().into_flow()?;
        let request = {
            let services = ctx.services();
            NotarisationRequest::new(tx_id,
                                     self.stx.tx.inputs.clone(),
                                     self.stx.tx.time_window,
                                     services.identity().clone(),
                                     services.key())
        };
        self.attempts += 1;
        let session = ctx.initiate_session(peer_of(&self.notary), NOTARY_TOPIC);
        self.session = Some(session);
        log::debug!("notary_client.request flow_id={} tx={} attempt={}",
                    ctx.flow_id(),
                    tx_id.short(),
                    self.attempts);
        FlowAction::send_and_receive(session, &request, Some(ctx.config().receive_timeout))
    }

    /// Devuelve la transacción con la firma del notario agregada.
    pub fn resume(&mut self,
                  ctx: &mut FlowContext<'_, NodeServices>,
                  input: Resume)
                  -> Result<Step<SignedTransaction>, FlowError> {
        match input {
            Resume::Failed { error: FlowError::SessionTimeout { session },
                             .. }
                if self.attempts <= ctx.config().notary_retries =>
            {
                log::warn!("notary_client.timeout flow_id={} session={session} attempt={}",
                           ctx.flow_id(),
                           self.attempts);
                Ok(Step::Action(self.send_request(ctx)?))
            }
            other => {
                let (session, response): (SessionId, NotarisationResponse) = other.into_message()?;
                if Some(session) != self.session {
                    return Err(FlowError::UnexpectedInput(format!("notary reply on stale session {session}")));
                }
                let signature = response.into_result().into_flow()?;
                self.check_signature(&signature)?;
                Ok(Step::Done(self.stx.clone().with_signature(signature)))
            }
        }
    }

    fn check_signature(&self, signature: &TransactionSignature) -> Result<(), FlowError> {
        if signature.by != self.notary.owning_key {
            return Err(FlowError::NotaryRejected(format!("signature by {} instead of notary {}",
                                                         signature.by, self.notary)));
        }
        signature.verify(&self.stx.id().into_flow()?).into_flow()
    }
}
