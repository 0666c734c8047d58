//! E2E: failure recovery — reconnect after abrupt close, and tasks that
//! outlive their connection.

use std::time::Duration;

use anyhow::Result;
use libtether::TaskState;
use tether_protocol::Reply;
use tether_tests::{FakeController, spawn_agent};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_after_abrupt_close() -> Result<()> {
    let controller = FakeController::bind().await?;
    let _agent = spawn_agent(controller.addr(), 1);

    for round in 0..3 {
        let mut link = controller.accept().await?;
        link.expect_banner().await?;
        link.send_repl(&format!("echo round {round}")).await?;
        assert_eq!(
            link.recv().await?,
            Reply::Output {
                data: format!("round {round}\n")
            }
        );
        assert!(matches!(link.recv().await?, Reply::Success { .. }));
        // No exit handshake: just drop the socket.
        drop(link);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_outliving_its_connection_is_discarded_not_fatal() -> Result<()> {
    let controller = FakeController::bind().await?;
    let agent = spawn_agent(controller.addr(), 1);

    let mut link = controller.accept().await?;
    link.expect_banner().await?;
    // Long enough that the connection is gone before the task finishes.
    link.send_repl("sleep 300").await?;
    drop(link);

    // The agent reconnects while the task is still running; the stale
    // task's output and status must not land on the new socket.
    let mut link = controller.accept().await?;
    link.expect_banner().await?;

    // Give the stale task time to finish, then prove the pool still works
    // and nothing leaked onto this connection.
    tokio::time::sleep(Duration::from_millis(500)).await;
    link.send_repl("echo still alive").await?;
    assert_eq!(
        link.recv().await?,
        Reply::Output {
            data: "still alive\n".to_string()
        }
    );
    assert!(matches!(link.recv().await?, Reply::Success { .. }));

    // The orphaned task ran to completion; there is no cancellation.
    assert_eq!(agent.ctx.engine.task_state(1), Some(TaskState::Completed));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_worker_drains_a_burst_in_order() -> Result<()> {
    let controller = FakeController::bind().await?;
    let _agent = spawn_agent(controller.addr(), 1);

    let mut link = controller.accept().await?;
    link.expect_banner().await?;

    // More submissions than workers: all must eventually complete, with
    // each task's output preceding its own success.
    for n in 0..4 {
        link.send_repl(&format!("echo task {n}")).await?;
    }
    for n in 0..4 {
        let (skipped, _success) =
            link.recv_until(|r| matches!(r, Reply::Success { .. })).await?;
        assert_eq!(
            skipped,
            vec![Reply::Output {
                data: format!("task {n}\n")
            }],
            "task {n} output must precede its completion"
        );
    }
    Ok(())
}
