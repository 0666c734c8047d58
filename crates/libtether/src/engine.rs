//! Execution engine: a fixed pool of worker threads draining one job queue.
//!
//! The pool is created once at process start and shared by every connection;
//! `worker_count` bounds concurrency and excess submissions simply queue.
//! Submission never blocks: completion is reported by queuing a `success` or
//! `error` reply on the submitting connection's outbound channel, after the
//! task's buffered output has been flushed. If that connection has since
//! closed, the multiplexer discards the writes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::mpsc;

use tether_protocol::Reply;

use crate::mux::OutputMux;
use crate::runtime::{Evaluator, SharedNamespace};

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

struct Job {
    id: TaskId,
    code: String,
    mux: OutputMux,
}

/// How many finished tasks stay queryable. The agent runs for the process
/// lifetime, so terminal records are evicted oldest-first past this cap
/// instead of accumulating forever.
const MAX_FINISHED_TASKS: usize = 256;

/// Task states, with bounded retention of terminal ones. Queued and running
/// entries are always present; they move into the finished ring when the
/// task ends.
#[derive(Default)]
struct TaskTable {
    states: HashMap<TaskId, TaskState>,
    finished: VecDeque<TaskId>,
}

impl TaskTable {
    fn set(&mut self, id: TaskId, state: TaskState) {
        if matches!(state, TaskState::Completed | TaskState::Failed) {
            self.finished.push_back(id);
            while self.finished.len() > MAX_FINISHED_TASKS {
                if let Some(evicted) = self.finished.pop_front() {
                    self.states.remove(&evicted);
                }
            }
        }
        self.states.insert(id, state);
    }

    fn get(&self, id: TaskId) -> Option<TaskState> {
        self.states.get(&id).copied()
    }
}

pub struct ExecEngine {
    queue: mpsc::UnboundedSender<Job>,
    states: Arc<Mutex<TaskTable>>,
    next_id: AtomicU64,
    // Detached for the process lifetime; the threads exit when the queue
    // sender is dropped.
    _workers: Vec<thread::JoinHandle<()>>,
}

impl ExecEngine {
    pub fn new(
        worker_count: usize,
        evaluator: Arc<dyn Evaluator>,
        namespace: SharedNamespace,
    ) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let states: Arc<Mutex<TaskTable>> = Arc::default();

        let workers = (0..worker_count)
            .map(|n| {
                let rx = Arc::clone(&rx);
                let states = Arc::clone(&states);
                let evaluator = Arc::clone(&evaluator);
                let namespace = Arc::clone(&namespace);
                thread::Builder::new()
                    .name(format!("tether-worker-{n}"))
                    .spawn(move || worker_loop(rx, states, evaluator, namespace))
                    .expect("spawn worker thread")
            })
            .collect();

        Arc::new(Self {
            queue: tx,
            states,
            // Task ids double as mux producer ids.
            next_id: AtomicU64::new(1),
            _workers: workers,
        })
    }

    /// Queue a code block for execution. Output and the final status go
    /// through `mux` under the task's own producer identity (its id), so
    /// concurrent tasks never corrupt each other's lines.
    pub fn submit(&self, code: String, mux: OutputMux) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.states.lock().unwrap().set(id, TaskState::Queued);
        tracing::debug!(task = id, "task queued");
        if self.queue.send(Job { id, code, mux }).is_err() {
            // Only reachable if the workers are gone, i.e. process teardown.
            self.states.lock().unwrap().set(id, TaskState::Failed);
        }
        id
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.states.lock().unwrap().get(id)
    }
}

fn worker_loop(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    states: Arc<Mutex<TaskTable>>,
    evaluator: Arc<dyn Evaluator>,
    namespace: SharedNamespace,
) {
    loop {
        // Hold the queue lock only while waiting for the next job.
        let job = rx.lock().unwrap().blocking_recv();
        let Some(job) = job else {
            break; // engine dropped
        };

        states.lock().unwrap().set(job.id, TaskState::Running);
        tracing::debug!(task = job.id, "task running");

        let mut sink = job.mux.sink(job.id);
        let result = evaluator.run(&job.code, &namespace, &mut sink);

        // Whatever the task printed goes out before its status, even when it
        // failed partway through.
        job.mux.flush(job.id);

        match result {
            Ok(()) => {
                states.lock().unwrap().set(job.id, TaskState::Completed);
                tracing::debug!(task = job.id, "task completed");
                job.mux.emit(Reply::Success {
                    message: "code executed successfully".to_string(),
                });
            }
            Err(e) => {
                states.lock().unwrap().set(job.id, TaskState::Failed);
                tracing::debug!(task = job.id, err = %e, "task failed");
                job.mux.emit(Reply::error(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EvalError, Namespace, OutputSink};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    /// Evaluator double: each run writes its code as output, then blocks
    /// until the test releases a gate, then succeeds (or fails when the code
    /// starts with "fail").
    struct GatedEvaluator {
        gates: Mutex<std_mpsc::Receiver<()>>,
    }

    impl GatedEvaluator {
        fn new() -> (Arc<Self>, std_mpsc::Sender<()>) {
            let (tx, rx) = std_mpsc::channel();
            (
                Arc::new(Self {
                    gates: Mutex::new(rx),
                }),
                tx,
            )
        }
    }

    impl Evaluator for GatedEvaluator {
        fn evaluate(
            &self,
            identifier: &str,
            _ns: &Namespace,
        ) -> Result<crate::runtime::Value, EvalError> {
            Err(EvalError::Undefined(identifier.to_string()))
        }

        fn run(
            &self,
            code: &str,
            _ns: &Mutex<Namespace>,
            out: &mut dyn OutputSink,
        ) -> Result<(), EvalError> {
            out.write(&format!("{code}\n"));
            self.gates
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .expect("gate released");
            if code.starts_with("fail") {
                out.write("partial");
                Err(EvalError::Failed(format!("boom in {code}")))
            } else {
                Ok(())
            }
        }
    }

    fn shared_ns() -> SharedNamespace {
        Arc::new(Mutex::new(Namespace::new()))
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Reply>) -> Reply {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reply within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn completion_is_asynchronous_and_ordered_after_output() {
        let (eval, gate) = GatedEvaluator::new();
        let engine = ExecEngine::new(2, eval, shared_ns());
        let (mux, mut rx) = OutputMux::new();

        let id = engine.submit("hello".to_string(), mux.clone());
        // Submission returned immediately; the task is queued or running.
        assert!(matches!(
            engine.task_state(id),
            Some(TaskState::Queued | TaskState::Running)
        ));

        gate.send(()).unwrap();
        assert_eq!(
            recv(&mut rx).await,
            Reply::Output {
                data: "hello\n".to_string()
            }
        );
        assert!(matches!(recv(&mut rx).await, Reply::Success { .. }));
        assert_eq!(engine.task_state(id), Some(TaskState::Completed));
    }

    #[tokio::test]
    async fn failed_task_delivers_output_before_error_status() {
        let (eval, gate) = GatedEvaluator::new();
        let engine = ExecEngine::new(1, eval, shared_ns());
        let (mux, mut rx) = OutputMux::new();

        let id = engine.submit("fail now".to_string(), mux.clone());
        gate.send(()).unwrap();

        assert_eq!(
            recv(&mut rx).await,
            Reply::Output {
                data: "fail now\n".to_string()
            }
        );
        // The unterminated tail written before the failure is flushed ahead
        // of the error status.
        assert_eq!(
            recv(&mut rx).await,
            Reply::Output {
                data: "partial".to_string()
            }
        );
        match recv(&mut rx).await {
            Reply::Error { error } => assert!(error.contains("boom in fail now")),
            other => panic!("expected error status, got {other:?}"),
        }
        assert_eq!(engine.task_state(id), Some(TaskState::Failed));
    }

    #[tokio::test]
    async fn excess_submissions_queue_instead_of_running() {
        let (eval, gate) = GatedEvaluator::new();
        let engine = ExecEngine::new(1, eval, shared_ns());
        let (mux, mut rx) = OutputMux::new();

        let first = engine.submit("one".to_string(), mux.clone());
        let second = engine.submit("two".to_string(), mux.clone());

        // Single worker: "two" cannot start until "one" vacates the slot.
        assert_eq!(
            recv(&mut rx).await,
            Reply::Output {
                data: "one\n".to_string()
            }
        );
        assert_eq!(engine.task_state(second), Some(TaskState::Queued));

        gate.send(()).unwrap(); // releases "one"
        assert!(matches!(recv(&mut rx).await, Reply::Success { .. }));

        gate.send(()).unwrap(); // releases "two"
        assert_eq!(
            recv(&mut rx).await,
            Reply::Output {
                data: "two\n".to_string()
            }
        );
        assert!(matches!(recv(&mut rx).await, Reply::Success { .. }));
        assert_eq!(engine.task_state(first), Some(TaskState::Completed));
        assert_eq!(engine.task_state(second), Some(TaskState::Completed));
    }

    #[tokio::test]
    async fn completion_after_connection_close_is_discarded() {
        let (eval, gate) = GatedEvaluator::new();
        let engine = ExecEngine::new(1, eval, shared_ns());
        let (mux, rx) = OutputMux::new();

        let id = engine.submit("orphan".to_string(), mux.clone());
        // The connection goes away while the task is still running.
        drop(rx);
        gate.send(()).unwrap();

        // The task still runs to completion; its writes are dropped silently.
        for _ in 0..100 {
            if engine.task_state(id) == Some(TaskState::Completed) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task never completed after connection close");
    }

    #[tokio::test]
    async fn finished_task_records_are_evicted_oldest_first() {
        let (eval, gate) = GatedEvaluator::new();
        let engine = ExecEngine::new(1, eval, shared_ns());
        let (mux, mut rx) = OutputMux::new();

        let total = MAX_FINISHED_TASKS + 50;
        for _ in 0..total {
            gate.send(()).unwrap();
        }
        let ids: Vec<TaskId> = (0..total)
            .map(|n| engine.submit(format!("task {n}"), mux.clone()))
            .collect();

        // Drain every output line and success status so all tasks are done.
        for _ in 0..total {
            assert!(matches!(recv(&mut rx).await, Reply::Output { .. }));
            assert!(matches!(recv(&mut rx).await, Reply::Success { .. }));
        }

        // The oldest terminal records fell out of the table; the newest are
        // still queryable.
        assert_eq!(engine.task_state(ids[0]), None);
        assert_eq!(engine.task_state(ids[49]), None);
        assert_eq!(engine.task_state(ids[50]), Some(TaskState::Completed));
        assert_eq!(
            engine.task_state(*ids.last().unwrap()),
            Some(TaskState::Completed)
        );
    }
}
