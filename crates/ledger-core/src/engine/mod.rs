//! Engine de flows: registro, runtime por flow y conducción.
mod builder;
mod driver;
mod handle;
mod registry;
mod retention;
mod runtime;

pub use builder::EngineBuilder;
pub use driver::FlowEngine;
pub use handle::{FlowHandle, FlowInfo, FlowOutcome, FlowResult};
