//! Finalización: notarizar si hace falta, registrar localmente y enviar la
//! transacción a los demás participantes.
use std::collections::BTreeMap;

use ledger_core::{FlowAction, FlowContext, FlowError, Outgoing, Resume};
use ledger_domain::{Party, SecureHash, SignedTransaction};
use serde::{Deserialize, Serialize};

use crate::errors::ResultExt;
use crate::notary_client::NotaryClient;
use crate::services::NodeServices;
use crate::{peer_of, Step, FINALITY_TOPIC};

/// Lo que recibe cada participante: la transacción final y las
/// transacciones que produjeron sus entradas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityPayload {
    pub stx: SignedTransaction,
    pub dependencies: Vec<SignedTransaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Phase {
    Notarising,
    Broadcasting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finality {
    stx: SignedTransaction,
    notary: Option<NotaryClient>,
    recipients: Vec<Party>,
    phase: Phase,
}

impl Finality {
    pub fn new(stx: SignedTransaction, recipients: Vec<Party>) -> Result<Self, FlowError> {
        let notary = if NotaryClient::needs_notary(&stx) {
            let party = stx.tx
                           .notary
                           .clone()
                           .ok_or_else(|| FlowError::ContractVerification("transaction has no notary".into()))?;
            Some(NotaryClient::new(stx.clone(), party))
        } else {
            None
        };
        Ok(Self { stx,
                  notary,
                  recipients,
                  phase: Phase::Notarising })
    }

    pub fn start(&mut self, ctx: &mut FlowContext<'_, NodeServices>) -> Result<Step<SignedTransaction>, FlowError> {
        match self.notary.as_mut() {
            Some(client) => Ok(Step::Action(client.start(ctx)?)),
            None => self.broadcast(ctx),
        }
    }

    pub fn resume(&mut self,
                  ctx: &mut FlowContext<'_, NodeServices>,
                  input: Resume)
                  -> Result<Step<SignedTransaction>, FlowError> {
        if self.phase == Phase::Broadcasting {
            return match input {
                Resume::Sent => Ok(Step::Done(self.stx.clone())),
                other => Err(FlowError::UnexpectedInput(format!("finality expected sent, got {}", other.kind()))),
            };
        }
        let Some(client) = self.notary.as_mut() else {
            return Err(FlowError::UnexpectedInput(format!("finality not started, got {}", input.kind())));
        };
        match client.resume(ctx, input)? {
            Step::Action(action) => Ok(Step::Action(action)),
            Step::Done(stx) => {
                self.stx = stx;
                self.broadcast(ctx)
            }
        }
    }

    fn broadcast(&mut self, ctx: &mut FlowContext<'_, NodeServices>) -> Result<Step<SignedTransaction>, FlowError> {
        self.stx.verify_required_signatures().into_flow()?;
        let (payload, us) = {
            let services = ctx.services();
            services.record_transaction(&self.stx)?;
            let mut dependencies: BTreeMap<SecureHash, SignedTransaction> = BTreeMap::new();
            for input in &self.stx.tx.inputs {
                if let Some(dep) = services.transactions().get(&input.txhash) {
                    dependencies.insert(input.txhash, dep);
                }
            }
            (FinalityPayload { stx: self.stx.clone(),
                               dependencies: dependencies.into_values().collect() },
             services.identity().clone())
        };
        let mut messages = Vec::new();
        for recipient in self.recipients.iter().filter(|r| **r != us) {
            let session = ctx.initiate_session(peer_of(recipient), FINALITY_TOPIC);
            messages.push(Outgoing::new(session, &payload)?);
        }
        if messages.is_empty() {
            return Ok(Step::Done(self.stx.clone()));
        }
        self.phase = Phase::Broadcasting;
        Ok(Step::Action(FlowAction::Send { messages }))
    }
}
