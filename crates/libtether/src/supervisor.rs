//! Session supervisor: connect, run, close, sleep, repeat — for the life of
//! the process. Connect failures are retried silently; nothing on the far
//! side exists yet to report them to.

use std::sync::Arc;
use std::time::Duration;

use crate::connector;
use crate::engine::ExecEngine;
use crate::runtime::{Evaluator, Inspector, SharedNamespace};
use crate::session;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub retry_delay: Duration,
}

/// Process-wide collaborators shared by every connection. The engine (and
/// its worker pool) is created once and survives reconnects; only the
/// multiplexer and inbound framing are per-connection.
#[derive(Clone)]
pub struct AgentContext {
    pub engine: Arc<ExecEngine>,
    pub evaluator: Arc<dyn Evaluator>,
    pub inspector: Arc<dyn Inspector>,
    pub namespace: SharedNamespace,
}

/// Run the reconnect loop forever. Only an external interrupt (handled by
/// the caller) ends the process.
pub async fn run(config: SupervisorConfig, ctx: AgentContext) -> anyhow::Result<()> {
    loop {
        match connector::connect(&config.host, config.port, config.connect_timeout).await {
            Ok(stream) => {
                tracing::info!(host = %config.host, port = config.port, "connected to controller");
                match session::run(stream, &ctx).await {
                    Ok(end) => tracing::info!(?end, "session ended"),
                    Err(e) => tracing::warn!(err = %e, "session failed"),
                }
            }
            Err(e) => {
                tracing::debug!(err = %e, "connect failed, retrying");
            }
        }
        tokio::time::sleep(config.retry_delay).await;
    }
}
