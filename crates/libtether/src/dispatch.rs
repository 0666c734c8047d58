//! Command dispatcher: one decoded record in, a routing decision out.
//!
//! Every failure inside command interpretation is converted to an `error`
//! reply here; nothing escapes to crash the session loop.

use std::sync::Arc;

use tether_protocol::{Command, Decoded, LinkStatus, Reply};

use crate::engine::{ExecEngine, TaskId};
use crate::mux::OutputMux;
use crate::path::{self, AccessPath};
use crate::runtime::{Evaluator, Inspector, SharedNamespace, Value};

/// What the session loop should do with a dispatched record.
#[derive(Debug)]
pub enum Outcome {
    /// Write these replies now.
    Reply(Reply),
    /// A task was queued; its `success`/`error` arrives later via the
    /// multiplexer channel.
    Deferred(TaskId),
    /// Acknowledge and end the connection loop. The worker pool is not
    /// affected.
    Exit(Reply),
}

pub struct Dispatcher {
    engine: Arc<ExecEngine>,
    evaluator: Arc<dyn Evaluator>,
    inspector: Arc<dyn Inspector>,
    namespace: SharedNamespace,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<ExecEngine>,
        evaluator: Arc<dyn Evaluator>,
        inspector: Arc<dyn Inspector>,
        namespace: SharedNamespace,
    ) -> Self {
        Self {
            engine,
            evaluator,
            inspector,
            namespace,
        }
    }

    pub fn dispatch(&self, decoded: Decoded, mux: &OutputMux) -> Outcome {
        match decoded {
            Decoded::Invalid { error } => Outcome::Reply(Reply::error(error)),
            Decoded::Command(Command::Repl { code }) => {
                if code.trim().is_empty() {
                    return Outcome::Reply(Reply::error("no code provided"));
                }
                let id = self.engine.submit(code, mux.clone());
                Outcome::Deferred(id)
            }
            Decoded::Command(Command::Inspect { expression }) => {
                if expression.trim().is_empty() {
                    return Outcome::Reply(Reply::error("no expression provided"));
                }
                Outcome::Reply(self.inspect(&expression))
            }
            Decoded::Command(Command::Exit) => Outcome::Exit(Reply::Status {
                status: LinkStatus::Disconnected,
                message: None,
            }),
        }
    }

    /// Resolve the expression step by step and describe the final value.
    /// Answers synchronously; any failure becomes one `error` reply.
    fn inspect(&self, expression: &str) -> Reply {
        let parsed = match path::parse(expression) {
            Ok(parsed) => parsed,
            Err(e) => return Reply::error(format!("invalid expression '{expression}': {e}")),
        };
        match self.resolve(&parsed) {
            Ok(value) => Reply::InspectResult {
                data: self.inspector.describe(&value),
            },
            Err(error) => Reply::Error { error },
        }
    }

    fn resolve(&self, parsed: &AccessPath) -> Result<Value, String> {
        let mut current = {
            let ns = self.namespace.lock().unwrap();
            self.evaluator
                .evaluate(&parsed.root, &ns)
                .map_err(|e| e.to_string())?
        };

        for step in &parsed.steps {
            // Indexed access first, attribute access as the fallback.
            current = current
                .index(step.key())
                .or_else(|| current.attr(step.key()))
                .ok_or_else(|| {
                    format!(
                        "cannot resolve {} on {} value",
                        step.describe(),
                        current.type_name()
                    )
                })?;
        }
        Ok(current)
    }
}
