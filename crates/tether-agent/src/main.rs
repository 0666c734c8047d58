//! tether-agent — unattended remote-execution agent.
//!
//! Dials the configured controller endpoint and stays connected for the life
//! of the process, reconnecting after every disconnect. Commands arrive as
//! JSON lines and run on a fixed worker pool against a process-wide
//! namespace; the only way to stop the agent is an external interrupt.

mod config;

use std::sync::{Arc, Mutex};

use libtether::registry::{JsonInspector, RegistryEvaluator};
use libtether::{AgentContext, Evaluator, ExecEngine, Inspector, Namespace, supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tether_agent=info,libtether=info".to_string()),
        )
        .init();

    let config = config::AgentConfig::load()?;
    tracing::info!(
        host = %config.controller_host,
        port = config.controller_port,
        workers = config.worker_count,
        "agent starting"
    );

    let namespace = Arc::new(Mutex::new(Namespace::new()));
    let evaluator: Arc<dyn Evaluator> = Arc::new(RegistryEvaluator::new());
    let inspector: Arc<dyn Inspector> = Arc::new(JsonInspector);
    // One engine for the process: the pool and the namespace survive
    // reconnects.
    let engine = ExecEngine::new(
        config.worker_count,
        Arc::clone(&evaluator),
        Arc::clone(&namespace),
    );

    let ctx = AgentContext {
        engine,
        evaluator,
        inspector,
        namespace,
    };

    tokio::select! {
        result = supervisor::run(config.supervisor(), ctx) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            Ok(())
        }
    }
}
