//! Registro de tipos de flow: cómo crearlos y cómo restaurarlos.
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::FlowError;
use crate::flow::{ErasedFlow, FlowLogic, InitiatingFlow, ResponderFlow};
use crate::messaging::PeerId;
use crate::session::SessionId;

pub(crate) type StartFn<S> = fn(Value) -> Result<Box<dyn ErasedFlow<S>>, FlowError>;
pub(crate) type RestoreFn<S> = fn(&str) -> Result<Box<dyn ErasedFlow<S>>, FlowError>;
pub(crate) type ResponderFn<S> = fn(SessionId, &PeerId) -> Box<dyn ErasedFlow<S>>;

fn start_initiator<S, F>(args: Value) -> Result<Box<dyn ErasedFlow<S>>, FlowError>
    where S: 'static,
          F: InitiatingFlow<S>
{
    let args: F::Args = serde_json::from_value(args)?;
    Ok(Box::new(F::from_args(args)?))
}

fn restore_flow<S, F>(raw: &str) -> Result<Box<dyn ErasedFlow<S>>, FlowError>
    where S: 'static,
          F: FlowLogic<S> + Serialize + DeserializeOwned
{
    let flow: F = serde_json::from_str(raw)?;
    Ok(Box::new(flow))
}

fn start_responder<S, F>(session: SessionId, peer: &PeerId) -> Box<dyn ErasedFlow<S>>
    where S: 'static,
          F: ResponderFlow<S>
{
    Box::new(F::on_initiated(session, peer))
}

pub(crate) struct FlowRegistry<S> {
    initiators: HashMap<&'static str, StartFn<S>>,
    restorers: HashMap<&'static str, RestoreFn<S>>,
    /// topic → (logic type del responder, fábrica)
    responders: HashMap<&'static str, (&'static str, ResponderFn<S>)>,
}

impl<S: 'static> FlowRegistry<S> {
    pub fn new() -> Self {
        Self { initiators: HashMap::new(),
               restorers: HashMap::new(),
               responders: HashMap::new() }
    }

    pub fn register_initiator<F: InitiatingFlow<S>>(&mut self) {
        self.initiators.insert(F::LOGIC_TYPE, start_initiator::<S, F> as StartFn<S>);
        self.restorers.insert(F::LOGIC_TYPE, restore_flow::<S, F> as RestoreFn<S>);
    }

    pub fn register_responder<F: ResponderFlow<S>>(&mut self) {
        self.responders.insert(F::INITIATED_BY, (F::LOGIC_TYPE, start_responder::<S, F> as ResponderFn<S>));
        self.restorers.insert(F::LOGIC_TYPE, restore_flow::<S, F> as RestoreFn<S>);
    }

    pub fn initiator(&self, logic_type: &str) -> Option<(&'static str, StartFn<S>)> {
        self.initiators.get_key_value(logic_type).map(|(k, f)| (*k, *f))
    }

    pub fn responder(&self, topic: &str) -> Option<(&'static str, ResponderFn<S>)> {
        self.responders.get(topic).copied()
    }

    pub fn restorer(&self, logic_type: &str) -> Option<RestoreFn<S>> {
        self.restorers.get(logic_type).copied()
    }

    pub fn logic_types(&self) -> Vec<&'static str> {
        let mut v: Vec<&'static str> = self.restorers.keys().copied().collect();
        v.sort_unstable();
        v
    }
}
