pub mod connector;
pub mod dispatch;
pub mod engine;
pub mod mux;
pub mod path;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod supervisor;

pub use dispatch::{Dispatcher, Outcome};
pub use engine::{ExecEngine, TaskId, TaskState};
pub use mux::{OutputMux, ProducerId};
pub use runtime::{
    Category, EvalError, Evaluator, Inspector, Namespace, Object, OutputSink, SharedNamespace,
    Value,
};
pub use supervisor::{AgentContext, SupervisorConfig};
