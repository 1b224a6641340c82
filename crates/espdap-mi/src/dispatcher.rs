//! MI command dispatcher
//!
//! GDB/MI accepts exactly one outstanding command at a time, so the
//! dispatcher funnels every command through an ordered queue and a single
//! in-flight slot. Callers enqueue and await; a background drain task pops
//! the queue whenever the target is not running, writes
//! `"<token>-<command>\n"` to GDB's stdin, and suspends until the reply for
//! that token arrives.
//!
//! Replies are correlated explicitly by token (map of token to oneshot
//! sender). The single-in-flight invariant means the next token-bearing
//! reply is always the right one, but the explicit match makes the
//! invariant checkable instead of assumed.
//!
//! The drain task runs on a fixed cadence for the lifetime of the session;
//! there is no stop operation and no per-command cancellation. An enqueue
//! additionally wakes the task immediately so dispatch latency is not bound
//! to the poll interval.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::exec_state::{ExecState, ExecStateTracker};
use crate::record::{ResultClass, ResultRecord};

/// Channel for handing a reply back to the enqueueing caller
type ReplySender = oneshot::Sender<Result<ResultRecord>>;

/// Dispatcher tuning knobs
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Poll cadence of the drain task
    pub drain_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(10),
        }
    }
}

/// A queued command awaiting dispatch.
struct Task {
    token: u64,
    text: String,
    completion: ReplySender,
}

struct Shared {
    /// Strictly increasing, never reused for the process lifetime
    next_token: AtomicU64,
    /// Ordered queue; priority tasks are pushed to the head
    queue: Mutex<VecDeque<Task>>,
    /// Pending reply slot, keyed by token. Holds at most one entry while
    /// the single-in-flight invariant is intact.
    pending: Mutex<HashMap<u64, ReplySender>>,
    /// GDB stdin
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Wakes the drain task on enqueue
    wakeup: Notify,
    exec: Arc<ExecStateTracker>,
}

/// Owns GDB's stdin and the ordered command queue.
pub struct CommandDispatcher {
    shared: Arc<Shared>,
    drain_task: Option<tokio::task::JoinHandle<()>>,
}

impl CommandDispatcher {
    pub fn new<W>(writer: W, exec: Arc<ExecStateTracker>, config: DispatcherConfig) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            next_token: AtomicU64::new(1),
            queue: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            writer: Mutex::new(Box::new(writer) as Box<dyn AsyncWrite + Send + Unpin>),
            wakeup: Notify::new(),
            exec,
        });

        let drain_task = tokio::spawn(Self::drain_loop(shared.clone(), config.drain_interval));

        Self {
            shared,
            drain_task: Some(drain_task),
        }
    }

    /// Execution-state tracker shared with the record reader.
    pub fn exec_state(&self) -> &Arc<ExecStateTracker> {
        &self.shared.exec
    }

    /// Enqueue a command and await its reply.
    ///
    /// Always accepts immediately; the await settles when GDB answers.
    /// Non-priority commands run in FIFO order; a priority command runs
    /// before everything still queued (the most recently enqueued priority
    /// command runs next), but never preempts a command already in flight.
    ///
    /// An `^error` reply resolves to [`Error::Command`] carrying GDB's
    /// message.
    pub async fn enqueue(&self, command: impl Into<String>, priority: bool) -> Result<ResultRecord> {
        let text = command.into();
        let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut queue = self.shared.queue.lock().await;
            let task = Task {
                token,
                text,
                completion: tx,
            };
            if priority {
                queue.push_front(task);
            } else {
                queue.push_back(task);
            }
        }
        self.shared.wakeup.notify_one();

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Communication(
                "session closed before reply".to_string(),
            )),
        }
    }

    /// Route a reply record to the caller that sent the matching command.
    ///
    /// Called by the record reader for every token-bearing result record.
    pub async fn complete(&self, record: ResultRecord) {
        let Some(token) = record.token else {
            trace!("ignoring token-less result record");
            return;
        };

        let sender = self.shared.pending.lock().await.remove(&token);
        match sender {
            Some(tx) => {
                let result = if record.class == ResultClass::Error {
                    let message = record
                        .error_message()
                        .unwrap_or("unknown error")
                        .to_string();
                    Err(Error::Command { message })
                } else {
                    Ok(record)
                };
                if tx.send(result).is_err() {
                    warn!(token, "reply receiver dropped before completion");
                }
            }
            None => warn!(token, "reply for unknown token"),
        }
    }

    /// Fail every queued and in-flight command.
    ///
    /// Used when the subprocess exits or its input stream breaks; the
    /// session is over and nothing enqueued can ever be answered.
    pub async fn fail_all(&self, reason: &str) {
        let mut queue = self.shared.queue.lock().await;
        for task in queue.drain(..) {
            let _ = task
                .completion
                .send(Err(Error::Communication(reason.to_string())));
        }
        drop(queue);

        let mut pending = self.shared.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(Error::Communication(reason.to_string())));
        }
    }

    /// Number of commands waiting in the queue (not counting in flight).
    pub async fn queued_len(&self) -> usize {
        self.shared.queue.lock().await.len()
    }

    async fn drain_loop(shared: Arc<Shared>, interval: Duration) {
        debug!("dispatcher drain task started");
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shared.wakeup.notified() => {}
            }
            Self::drain_step(&shared).await;
        }
    }

    /// Send queued commands one at a time until the queue empties or the
    /// target starts running.
    async fn drain_step(shared: &Arc<Shared>) {
        loop {
            if shared.exec.state() == ExecState::Running {
                break;
            }
            let task = shared.queue.lock().await.pop_front();
            let Some(task) = task else { break };
            Self::send_and_await(shared, task).await;
        }
    }

    /// Write one command and suspend until its reply is routed back.
    ///
    /// Holding the drain step here is what enforces single in-flight.
    async fn send_and_await(shared: &Arc<Shared>, task: Task) {
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().await.insert(task.token, tx);

        let line = format!("{}-{}\n", task.token, task.text);
        let write_result = {
            let mut writer = shared.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            }
        };

        if let Err(err) = write_result {
            warn!(token = task.token, error = %err, "failed to write command to GDB");
            shared.pending.lock().await.remove(&task.token);
            let _ = task
                .completion
                .send(Err(Error::Communication(err.to_string())));
            return;
        }
        debug!(token = task.token, command = %task.text, "command sent");

        match rx.await {
            Ok(result) => {
                debug!(token = task.token, "command completed");
                let _ = task.completion.send(result);
            }
            Err(_) => {
                let _ = task.completion.send(Err(Error::Communication(
                    "session closed before reply".to_string(),
                )));
            }
        }
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.drain_task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MiValue;
    use std::collections::HashMap as StdHashMap;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    fn reply(token: u64, class: ResultClass) -> ResultRecord {
        ResultRecord {
            token: Some(token),
            class,
            fields: MiValue::empty(),
        }
    }

    fn error_reply(token: u64, msg: &str) -> ResultRecord {
        let mut fields = StdHashMap::new();
        fields.insert("msg".to_string(), MiValue::String(msg.to_string()));
        ResultRecord {
            token: Some(token),
            class: ResultClass::Error,
            fields: MiValue::Tuple(fields),
        }
    }

    fn test_dispatcher() -> (Arc<CommandDispatcher>, BufReader<DuplexStream>) {
        let (gdb_side, dap_side) = tokio::io::duplex(4096);
        let exec = Arc::new(ExecStateTracker::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            dap_side,
            exec,
            DispatcherConfig::default(),
        ));
        (dispatcher, BufReader::new(gdb_side))
    }

    async fn read_sent_line(reader: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(1), reader.read_line(&mut line))
            .await
            .expect("timed out waiting for command")
            .unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn commands_carry_token_prefix_and_newline() {
        let (dispatcher, mut gdb) = test_dispatcher();

        let d = dispatcher.clone();
        let pending = tokio::spawn(async move { d.enqueue("thread-info", false).await });

        let line = read_sent_line(&mut gdb).await;
        assert_eq!(line, "1-thread-info");

        dispatcher.complete(reply(1, ResultClass::Done)).await;
        let record = pending.await.unwrap().unwrap();
        assert_eq!(record.class, ResultClass::Done);
    }

    #[tokio::test]
    async fn at_most_one_command_in_flight() {
        let (dispatcher, mut gdb) = test_dispatcher();

        let d1 = dispatcher.clone();
        let d2 = dispatcher.clone();
        let first = tokio::spawn(async move { d1.enqueue("break-insert main.c:10", false).await });
        let second = tokio::spawn(async move { d2.enqueue("thread-info", false).await });

        let line = read_sent_line(&mut gdb).await;
        let first_token: u64 = line.split('-').next().unwrap().parse().unwrap();

        // The second command must not hit the wire until the first reply
        // has been routed.
        let mut probe = String::new();
        let blocked =
            tokio::time::timeout(Duration::from_millis(100), gdb.read_line(&mut probe)).await;
        assert!(blocked.is_err(), "second command sent while one in flight");

        dispatcher.complete(reply(first_token, ResultClass::Done)).await;
        first.await.unwrap().unwrap();

        let line = read_sent_line(&mut gdb).await;
        let second_token: u64 = line.split('-').next().unwrap().parse().unwrap();
        assert!(second_token > first_token, "tokens must strictly increase");

        dispatcher.complete(reply(second_token, ResultClass::Done)).await;
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn priority_commands_jump_queued_commands() {
        let (dispatcher, mut gdb) = test_dispatcher();

        // Gate the queue shut so nothing dispatches while we enqueue.
        dispatcher
            .exec_state()
            .observe(&crate::record::NotifyRecord {
                class: "running".to_string(),
                fields: MiValue::empty(),
            })
            .unwrap();

        let d1 = dispatcher.clone();
        let d2 = dispatcher.clone();
        let normal = tokio::spawn(async move { d1.enqueue("break-insert main.c:10", false).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let prio = tokio::spawn(async move { d2.enqueue("thread-info", true).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        dispatcher.exec_state().force_stopped();

        // The priority command dispatches first even though it was
        // enqueued second.
        let line = read_sent_line(&mut gdb).await;
        assert!(line.ends_with("-thread-info"), "got {line}");
        let token: u64 = line.split('-').next().unwrap().parse().unwrap();
        dispatcher.complete(reply(token, ResultClass::Done)).await;
        prio.await.unwrap().unwrap();

        let line = read_sent_line(&mut gdb).await;
        assert!(line.ends_with("-break-insert main.c:10"), "got {line}");
        let token: u64 = line.split('-').next().unwrap().parse().unwrap();
        dispatcher.complete(reply(token, ResultClass::Done)).await;
        normal.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn nothing_dispatches_while_target_runs() {
        let (dispatcher, mut gdb) = test_dispatcher();

        dispatcher
            .exec_state()
            .observe(&crate::record::NotifyRecord {
                class: "running".to_string(),
                fields: MiValue::empty(),
            })
            .unwrap();

        let d = dispatcher.clone();
        let pending = tokio::spawn(async move { d.enqueue("stack-list-frames", false).await });

        let mut probe = String::new();
        let blocked =
            tokio::time::timeout(Duration::from_millis(100), gdb.read_line(&mut probe)).await;
        assert!(blocked.is_err(), "command dispatched while target running");

        dispatcher.exec_state().force_stopped();
        let line = read_sent_line(&mut gdb).await;
        assert!(line.ends_with("-stack-list-frames"));

        let token: u64 = line.split('-').next().unwrap().parse().unwrap();
        dispatcher.complete(reply(token, ResultClass::Done)).await;
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn error_reply_propagates_as_typed_error() {
        let (dispatcher, mut gdb) = test_dispatcher();

        let d = dispatcher.clone();
        let pending = tokio::spawn(async move { d.enqueue("break-insert nope.c:1", false).await });

        let line = read_sent_line(&mut gdb).await;
        let token: u64 = line.split('-').next().unwrap().parse().unwrap();
        dispatcher
            .complete(error_reply(token, "No source file named nope.c."))
            .await;

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            Error::Command {
                message: "No source file named nope.c.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn fail_all_resolves_queued_and_in_flight() {
        let (dispatcher, mut gdb) = test_dispatcher();

        let d1 = dispatcher.clone();
        let d2 = dispatcher.clone();
        let in_flight = tokio::spawn(async move { d1.enqueue("thread-info", false).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = tokio::spawn(async move { d2.enqueue("stack-list-frames", false).await });

        // First command reaches the wire, second stays queued behind it.
        let _ = read_sent_line(&mut gdb).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        dispatcher.fail_all("GDB exited").await;

        for handle in [in_flight, queued] {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::Communication(_)), "got {err:?}");
        }
    }
}
