//! The seam between the protocol core and the hosting execution environment.
//!
//! The core never evaluates code or reflects on live objects itself. It talks
//! to two collaborators: an [`Evaluator`] that resolves identifiers and runs
//! code blocks against the shared [`Namespace`], and an [`Inspector`] that
//! turns a resolved [`Value`] into a JSON description. The shipped
//! implementations live in [`crate::registry`] and expose a deliberately
//! narrow command surface instead of unrestricted evaluation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// A live value the controller can address. `index` is item access
/// (`obj[key]`), `attr` is attribute access (`obj.name`); an implementation
/// may support either, both, or neither axis.
pub trait Object: Send + Sync {
    fn type_name(&self) -> &str;
    fn category(&self) -> Category;
    /// Printable rendering, shown to a human on the controller side.
    fn display(&self) -> String;
    fn index(&self, key: &str) -> Option<Value>;
    fn attr(&self, name: &str) -> Option<Value>;
    fn attr_names(&self) -> Vec<String> {
        Vec::new()
    }
    fn callable_names(&self) -> Vec<String> {
        Vec::new()
    }
}

pub type Value = Arc<dyn Object>;

/// Coarse classification reported by introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Scalar,
    Sequence,
    Mapping,
    Callable,
    Opaque,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Scalar => "scalar",
            Category::Sequence => "sequence",
            Category::Mapping => "mapping",
            Category::Callable => "callable",
            Category::Opaque => "opaque",
        }
    }
}

/// Process-wide mutable bindings shared by every task. Mutations made by one
/// task are visible to tasks submitted later; that is a documented contract
/// of the execution model, not an oversight.
#[derive(Default)]
pub struct Namespace {
    bindings: HashMap<String, Value>,
}

/// The namespace as every task sees it: one per process, behind a mutex.
/// Collaborators lock it per operation, not for the whole run, so concurrent
/// tasks interleave on shared bindings.
pub type SharedNamespace = Arc<Mutex<Namespace>>;

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).cloned()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn unset(&mut self, name: &str) -> bool {
        self.bindings.remove(name).is_some()
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("name not defined: {0}")]
    Undefined(String),
    /// Execution failed; the message is the full diagnostic sent back to the
    /// controller as an `error` status.
    #[error("{0}")]
    Failed(String),
}

/// Destination for output produced while a task runs. Backed by one producer
/// stream in the output multiplexer; `write` may carry partial lines,
/// `flush` forces out whatever tail remains.
pub trait OutputSink {
    fn write(&mut self, text: &str);
    fn flush(&mut self);
}

/// External evaluation capability.
pub trait Evaluator: Send + Sync {
    /// Resolve a bare identifier against the namespace.
    fn evaluate(&self, identifier: &str, ns: &Namespace) -> Result<Value, EvalError>;

    /// Run a code block. Anything the code prints goes through `out`; an
    /// `Err` carries the diagnostic for the controller. The namespace mutex
    /// is taken per operation inside the implementation.
    fn run(
        &self,
        code: &str,
        ns: &Mutex<Namespace>,
        out: &mut dyn OutputSink,
    ) -> Result<(), EvalError>;
}

/// External introspection capability: describe a resolved value as a
/// JSON-serializable structure. Opaque to the core.
pub trait Inspector: Send + Sync {
    fn describe(&self, value: &Value) -> serde_json::Value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JsonObject;

    #[test]
    fn namespace_set_get_unset() {
        let mut ns = Namespace::new();
        assert!(ns.get("x").is_none());

        ns.set("x", JsonObject::value(serde_json::json!(42)));
        ns.set("a", JsonObject::value(serde_json::json!("hi")));
        assert_eq!(ns.get("x").expect("bound").display(), "42");
        assert_eq!(ns.names(), vec!["a".to_string(), "x".to_string()]);

        assert!(ns.unset("x"));
        assert!(!ns.unset("x"));
        assert!(ns.get("x").is_none());
    }
}
