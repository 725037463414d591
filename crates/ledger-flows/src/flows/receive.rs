use std::collections::HashMap;

use ledger_contracts::CashContract;
use ledger_core::{FlowAction, FlowContext, FlowError, FlowLogic, PeerId, ResponderFlow, Resume, SessionId};
use ledger_domain::SecureHash;
use serde::{Deserialize, Serialize};

use super::TxResult;
use crate::errors::ResultExt;
use crate::finality::FinalityPayload;
use crate::services::NodeServices;
use crate::FINALITY_TOPIC;

/// Recibe una transacción finalizada, la verifica contra sus dependencias y
/// la registra en el vault.
#[derive(Debug, Serialize, Deserialize)]
pub struct CashReceiveFlow {
    session: SessionId,
    sender: PeerId,
}

fn verify_payload(services: &NodeServices, payload: &FinalityPayload) -> Result<(), FlowError> {
    let mut dependencies = HashMap::new();
    for dep in &payload.dependencies {
        dependencies.insert(dep.id().into_flow()?, dep);
    }
    let resolve = |r: &ledger_domain::StateRef| {
        dependencies.get(&r.txhash)
                    .and_then(|d| d.tx.outputs.get(r.index as usize).cloned())
                    .or_else(|| services.resolve(r))
    };
    let ltx = payload.stx.to_ledger_transaction(resolve).into_flow()?;
    payload.stx.verify_required_signatures().into_flow()?;
    CashContract::verify(&ltx).into_flow()?;
    Ok(())
}

impl FlowLogic<NodeServices> for CashReceiveFlow {
    fn resume(&mut self, ctx: &mut FlowContext<'_, NodeServices>, input: Resume) -> Result<FlowAction, FlowError> {
        if let Resume::Start = input {
            return Ok(FlowAction::receive(self.session, None));
        }
        let (_, payload): (SessionId, FinalityPayload) = input.into_message()?;
        let services = ctx.services();
        verify_payload(services, &payload)?;
        for dep in &payload.dependencies {
            let id: SecureHash = dep.id().into_flow()?;
            services.transactions().add(id, dep.clone());
        }
        services.record_transaction(&payload.stx)?;
        log::info!("cash.receive:recorded node={} from={} tx={}",
                   ctx.our_identity(),
                   self.sender,
                   payload.stx.id().into_flow()?.short());
        FlowAction::complete(&TxResult::of(payload.stx)?)
    }
}

impl ResponderFlow<NodeServices> for CashReceiveFlow {
    const LOGIC_TYPE: &'static str = "cash.receive";
    const INITIATED_BY: &'static str = FINALITY_TOPIC;

    fn on_initiated(session: SessionId, counterparty: &PeerId) -> Self {
        Self { session,
               sender: counterparty.clone() }
    }
}
