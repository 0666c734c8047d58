//! Per-connection session loop.
//!
//! Owns the socket for its lifetime: framed reads on one half, framed writes
//! on the other, with a `select!` alternation between draining the outbound
//! reply channel and decoding inbound records. Only this task touches the
//! write half, so responses and task output can never interleave partially.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use tether_protocol::{Decoded, LinkStatus, RecordCodec, Reply};

use crate::dispatch::{Dispatcher, Outcome};
use crate::mux::OutputMux;
use crate::supervisor::AgentContext;

/// Why the session ended. Every variant converges on close-and-retry in the
/// supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Controller sent `exit`.
    Requested,
    /// Read returned end-of-stream.
    Eof,
}

pub async fn run(stream: TcpStream, ctx: &AgentContext) -> anyhow::Result<SessionEnd> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, RecordCodec::new());
    let mut writer = FramedWrite::new(write_half, RecordCodec::new());

    // Fresh multiplexer per connection; tasks outliving it write into a
    // closed channel and are discarded.
    let (mux, mut outbound) = OutputMux::new();
    let dispatcher = Dispatcher::new(
        ctx.engine.clone(),
        ctx.evaluator.clone(),
        ctx.inspector.clone(),
        ctx.namespace.clone(),
    );

    writer
        .send(Reply::Status {
            status: LinkStatus::Connected,
            message: Some("tether agent ready".to_string()),
        })
        .await?;

    loop {
        tokio::select! {
            reply = outbound.recv() => {
                // The mux handle lives in this scope, so the channel cannot
                // close under us; any write failure ends the session.
                let Some(reply) = reply else { break Ok(SessionEnd::Eof) };
                writer.send(reply).await?;
            }
            record = reader.next() => {
                match record {
                    None => {
                        tracing::info!("controller closed the stream");
                        break Ok(SessionEnd::Eof);
                    }
                    Some(Err(e)) => {
                        return Err(anyhow::Error::from(e).context("read failed"));
                    }
                    Some(Ok(decoded)) => {
                        if let Decoded::Invalid { ref error } = decoded {
                            tracing::debug!(err = %error, "malformed record");
                        }
                        match dispatcher.dispatch(decoded, &mux) {
                            Outcome::Reply(reply) => writer.send(reply).await?,
                            Outcome::Deferred(task) => {
                                tracing::debug!(task, "deferred to engine");
                            }
                            Outcome::Exit(ack) => {
                                // Best effort: the acknowledgement may race
                                // the controller tearing the link down.
                                let _ = writer.send(ack).await;
                                break Ok(SessionEnd::Requested);
                            }
                        }
                    }
                }
            }
        }
    }
}
