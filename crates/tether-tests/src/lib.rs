//! Test harness: a fake controller the agent dials into, plus helpers to
//! spawn a real supervisor with short timeouts.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use libtether::registry::{JsonInspector, RegistryEvaluator};
use libtether::{
    AgentContext, Evaluator, ExecEngine, Inspector, Namespace, SupervisorConfig, supervisor,
};
use tether_protocol::Reply;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Listener standing in for the controller endpoint the agent dials.
pub struct FakeController {
    listener: TcpListener,
}

impl FakeController {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind fake controller")?;
        Ok(Self { listener })
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("listener addr")
    }

    /// Wait for the agent's next inbound connection.
    pub async fn accept(&self) -> Result<ControllerLink> {
        let (stream, _) = tokio::time::timeout(RECV_TIMEOUT, self.listener.accept())
            .await
            .context("agent never connected")??;
        let (read_half, write_half) = stream.into_split();
        Ok(ControllerLink {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }
}

/// One accepted agent connection, seen from the controller side.
pub struct ControllerLink {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControllerLink {
    /// Send one raw line (a record, or garbage for protocol tests).
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    pub async fn send_repl(&mut self, code: &str) -> Result<()> {
        let record = serde_json::json!({"kind": "repl", "code": code});
        self.send_line(&record.to_string()).await
    }

    pub async fn send_inspect(&mut self, expression: &str) -> Result<()> {
        let record = serde_json::json!({"kind": "inspect", "expression": expression});
        self.send_line(&record.to_string()).await
    }

    pub async fn send_exit(&mut self) -> Result<()> {
        self.send_line(r#"{"kind":"exit"}"#).await
    }

    /// Read the next reply, with a timeout so a hung agent fails the test
    /// instead of wedging it.
    pub async fn recv(&mut self) -> Result<Reply> {
        let mut line = String::new();
        let n = tokio::time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .context("no reply within timeout")??;
        anyhow::ensure!(n > 0, "agent closed the connection");
        serde_json::from_str(&line).with_context(|| format!("bad reply line: {line:?}"))
    }

    /// Read replies until one matches, returning the skipped ones too.
    pub async fn recv_until(
        &mut self,
        mut matches: impl FnMut(&Reply) -> bool,
    ) -> Result<(Vec<Reply>, Reply)> {
        let mut skipped = Vec::new();
        loop {
            let reply = self.recv().await?;
            if matches(&reply) {
                return Ok((skipped, reply));
            }
            skipped.push(reply);
        }
    }

    pub async fn expect_banner(&mut self) -> Result<()> {
        match self.recv().await? {
            Reply::Status { status, .. }
                if status == tether_protocol::LinkStatus::Connected =>
            {
                Ok(())
            }
            other => anyhow::bail!("expected connected banner, got {other:?}"),
        }
    }
}

/// A running agent under test.
pub struct AgentHandle {
    pub ctx: AgentContext,
    supervisor: JoinHandle<anyhow::Result<()>>,
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

/// Spawn a supervisor dialing `addr`, with test-friendly timeouts and a
/// registry evaluator extended with a `sleep <ms>` command for slow-task
/// scenarios.
pub fn spawn_agent(addr: SocketAddr, worker_count: usize) -> AgentHandle {
    let namespace = Arc::new(Mutex::new(Namespace::new()));
    let mut registry = RegistryEvaluator::new();
    registry.register("sleep", |args, _ns, out| {
        let ms: u64 = args.trim().parse().map_err(|_| {
            libtether::EvalError::Failed("usage: sleep <ms>".to_string())
        })?;
        std::thread::sleep(Duration::from_millis(ms));
        out.write("slept\n");
        Ok(())
    });
    let evaluator: Arc<dyn Evaluator> = Arc::new(registry);
    let inspector: Arc<dyn Inspector> = Arc::new(JsonInspector);
    let engine = ExecEngine::new(worker_count, Arc::clone(&evaluator), Arc::clone(&namespace));

    let ctx = AgentContext {
        engine,
        evaluator,
        inspector,
        namespace,
    };

    let config = SupervisorConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        connect_timeout: Duration::from_secs(1),
        retry_delay: Duration::from_millis(25),
    };

    let supervisor = tokio::spawn(supervisor::run(config, ctx.clone()));
    AgentHandle { ctx, supervisor }
}
