pub mod codec;

use serde::{Deserialize, Serialize};

pub use codec::{Decoded, RecordCodec};

/// Controller-to-agent commands, sent as JSON-lines over the TCP stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Execute a code block against the shared namespace.
    Repl { code: String },
    /// Resolve an access expression and describe the resulting object.
    Inspect { expression: String },
    /// Close this connection. The agent will reconnect; the worker pool survives.
    Exit,
}

/// Agent-to-controller replies. Every reply carries its own `kind` tag so the
/// controller can multiplex task output, statuses, and results on one stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Status {
        status: LinkStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Output {
        data: String,
    },
    Success {
        message: String,
    },
    Error {
        error: String,
    },
    InspectResult {
        data: serde_json::Value,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

impl Reply {
    /// Shorthand for the ubiquitous error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            error: message.into(),
        }
    }
}
