//! Shipped collaborators: a command-registry evaluator and a structural
//! inspector over JSON-backed values.
//!
//! This is a deliberate capability reduction. Where the system this agent
//! descends from executed arbitrary code against its own runtime, tether
//! exposes only an explicit, auditable registry of commands operating on
//! JSON values in the shared namespace. Hosts that need more register their
//! own commands; nothing outside the registry is reachable from the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::runtime::{
    Category, EvalError, Evaluator, Inspector, Namespace, Object, OutputSink, Value,
};

/// A JSON value exposed through the [`Object`] access model. JSON has no
/// separate attribute axis, so mapping keys serve both `[key]` and `.name`
/// access.
pub struct JsonObject(serde_json::Value);

impl JsonObject {
    pub fn value(v: serde_json::Value) -> Value {
        Arc::new(JsonObject(v))
    }

    pub fn json(&self) -> &serde_json::Value {
        &self.0
    }
}

impl Object for JsonObject {
    fn type_name(&self) -> &str {
        match &self.0 {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "bool",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        }
    }

    fn category(&self) -> Category {
        match &self.0 {
            serde_json::Value::Array(_) => Category::Sequence,
            serde_json::Value::Object(_) => Category::Mapping,
            _ => Category::Scalar,
        }
    }

    fn display(&self) -> String {
        match &self.0 {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn index(&self, key: &str) -> Option<Value> {
        match &self.0 {
            serde_json::Value::Object(map) => map.get(key).cloned().map(JsonObject::value),
            serde_json::Value::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .map(JsonObject::value),
            _ => None,
        }
    }

    fn attr(&self, name: &str) -> Option<Value> {
        match &self.0 {
            serde_json::Value::Object(map) => map.get(name).cloned().map(JsonObject::value),
            _ => None,
        }
    }

    fn attr_names(&self) -> Vec<String> {
        match &self.0 {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// Signature of a registered command: raw argument text, the shared
/// namespace, and the task's output sink.
pub type CommandFn =
    dyn Fn(&str, &Mutex<Namespace>, &mut dyn OutputSink) -> Result<(), EvalError> + Send + Sync;

/// Evaluator over an explicit command registry. Each non-empty line of a
/// `repl` payload is `<command> [args...]`; unknown commands fail the task
/// with a diagnostic naming the line.
pub struct RegistryEvaluator {
    commands: HashMap<String, Box<CommandFn>>,
}

impl RegistryEvaluator {
    pub fn new() -> Self {
        let mut this = Self {
            commands: HashMap::new(),
        };
        this.register("set", |args, ns, _out| {
            let (name, literal) = split_arg(args)
                .ok_or_else(|| EvalError::Failed("usage: set <name> <json>".to_string()))?;
            let value: serde_json::Value = serde_json::from_str(literal)
                .map_err(|e| EvalError::Failed(format!("invalid json literal: {e}")))?;
            ns.lock().unwrap().set(name, JsonObject::value(value));
            Ok(())
        });
        this.register("unset", |args, ns, _out| {
            let name = args.trim();
            if name.is_empty() {
                return Err(EvalError::Failed("usage: unset <name>".to_string()));
            }
            if !ns.lock().unwrap().unset(name) {
                return Err(EvalError::Undefined(name.to_string()));
            }
            Ok(())
        });
        this.register("show", |args, ns, out| {
            let name = args.trim();
            if name.is_empty() {
                return Err(EvalError::Failed("usage: show <name>".to_string()));
            }
            let value = ns
                .lock()
                .unwrap()
                .get(name)
                .ok_or_else(|| EvalError::Undefined(name.to_string()))?;
            out.write(&value.display());
            out.write("\n");
            Ok(())
        });
        this.register("vars", |_args, ns, out| {
            for name in ns.lock().unwrap().names() {
                out.write(&name);
                out.write("\n");
            }
            Ok(())
        });
        this.register("echo", |args, _ns, out| {
            out.write(args);
            out.write("\n");
            Ok(())
        });
        this
    }

    /// Register a host-provided command. Replaces any existing command of
    /// the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&str, &Mutex<Namespace>, &mut dyn OutputSink) -> Result<(), EvalError>
            + Send
            + Sync
            + 'static,
    {
        self.commands.insert(name.into(), Box::new(f));
    }
}

impl Default for RegistryEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for RegistryEvaluator {
    fn evaluate(&self, identifier: &str, ns: &Namespace) -> Result<Value, EvalError> {
        ns.get(identifier)
            .ok_or_else(|| EvalError::Undefined(identifier.to_string()))
    }

    fn run(
        &self,
        code: &str,
        ns: &Mutex<Namespace>,
        out: &mut dyn OutputSink,
    ) -> Result<(), EvalError> {
        for (lineno, line) in code.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (word, args) = split_arg(line).unwrap_or((line, ""));
            let command = self
                .commands
                .get(word)
                .ok_or_else(|| {
                    EvalError::Failed(format!("line {}: unknown command: {word}", lineno + 1))
                })?;
            command(args, ns, out)
                .map_err(|e| EvalError::Failed(format!("line {}: {e}", lineno + 1)))?;
        }
        Ok(())
    }
}

/// Split off the first whitespace-delimited word; the rest is raw argument
/// text (JSON literals may contain spaces).
fn split_arg(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text.split_once(char::is_whitespace) {
        Some((head, rest)) => Some((head, rest.trim_start())),
        None => Some((text, "")),
    }
}

/// Structural description of a value, mirroring the introspection shape the
/// controller expects: type, category, printable value, attributes,
/// callables.
pub struct JsonInspector;

impl Inspector for JsonInspector {
    fn describe(&self, value: &Value) -> serde_json::Value {
        let mut attributes = value.attr_names();
        attributes.sort();
        let mut methods = value.callable_names();
        methods.sort();
        json!({
            "type": value.type_name(),
            "category": value.category().as_str(),
            "value": value.display(),
            "attributes": attributes,
            "methods": methods,
        })
    }
}
