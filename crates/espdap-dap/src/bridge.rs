//! Session bridge
//!
//! Maps each editor request onto one or more MI commands and shapes the
//! replies back into DAP data, using the handle tables and the variable
//! object cache to keep references stable across independent requests.
//!
//! The bridge also owns the startup handshake and the readiness gate:
//! requests that only make sense once the debugger is attached and halted
//! (breakpoints, threads) wait for the handshake to finish, with a fixed
//! timeout after which they proceed best-effort rather than fail.

use std::collections::HashMap;
use std::sync::Arc;

use espdap_mi::{CommandDispatcher, MiValue};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::LaunchConfig;
use crate::error::{Error, Result};
use crate::handles::{FrameId, VAR_REF_START};
use crate::protocol::{Breakpoint, Scope, Source, StackFrame, Thread, Variable};
use crate::variables::{local_identity, VariableCache, VariableObject};

pub struct SessionBridge {
    dispatcher: Arc<CommandDispatcher>,
    config: LaunchConfig,
    /// Flips to true exactly once, when the startup handshake completes
    ready: watch::Sender<bool>,
    /// Serializes the startup sequence; nothing else runs it twice
    startup_guard: Mutex<()>,
    /// path → breakpoint numbers previously issued for that file
    breakpoints: Mutex<HashMap<String, Vec<u64>>>,
    variables: Mutex<VariableCache>,
}

impl SessionBridge {
    pub fn new(dispatcher: Arc<CommandDispatcher>, config: LaunchConfig) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            dispatcher,
            config,
            ready,
            startup_guard: Mutex::new(()),
            breakpoints: Mutex::new(HashMap::new()),
            variables: Mutex::new(VariableCache::new()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Run the startup handshake.
    ///
    /// Issues the configured command sequence strictly in order, then
    /// marks the session ready and wakes every gated request. The guard
    /// keeps a second launch request from interleaving with a handshake
    /// already in progress.
    pub async fn run_startup(&self) -> Result<()> {
        let _guard = self.startup_guard.lock().await;
        if *self.ready.borrow() {
            debug!("startup already complete");
            return Ok(());
        }

        for command in self.config.startup_commands() {
            self.dispatcher.enqueue(command, false).await?;
        }

        self.dispatcher.exec_state().mark_startup_complete();
        self.ready.send_replace(true);
        info!("debugger startup complete, session ready");
        Ok(())
    }

    /// Block until the session is ready or the timeout elapses.
    ///
    /// Timing out degrades to a warning: the request proceeds against a
    /// possibly-not-ready debugger instead of failing. GDB itself will
    /// queue or reject whatever cannot be served yet.
    async fn wait_ready(&self, operation: &str) {
        let mut ready = self.ready.subscribe();
        if *ready.borrow_and_update() {
            return;
        }
        debug!(operation, "waiting for startup to complete");

        let wait = async {
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(self.config.ready_timeout(), wait)
            .await
            .is_err()
        {
            warn!(
                operation,
                timeout_ms = self.config.ready_timeout_ms,
                "startup not complete within timeout, proceeding best-effort"
            );
        }
    }

    /// Replace every breakpoint recorded for `path` with the given lines.
    ///
    /// All clears for the file complete before any insert is issued;
    /// ordering across distinct files is not guaranteed.
    pub async fn set_breakpoints(&self, path: &str, lines: &[u32]) -> Result<Vec<Breakpoint>> {
        self.wait_ready("setBreakpoints").await;

        let stale = self
            .breakpoints
            .lock()
            .await
            .remove(path)
            .unwrap_or_default();

        let mut clears = Vec::with_capacity(stale.len());
        for number in stale {
            let dispatcher = self.dispatcher.clone();
            clears.push(tokio::spawn(async move {
                // A failed clear leaves a stale breakpoint behind; not
                // worth failing the whole request over.
                if let Err(err) = dispatcher
                    .enqueue(format!("break-delete {number}"), false)
                    .await
                {
                    warn!(number, error = %err, "failed to clear breakpoint");
                }
            }));
        }
        for clear in clears {
            let _ = clear.await;
        }

        let mut inserts = Vec::with_capacity(lines.len());
        for &line in lines {
            let dispatcher = self.dispatcher.clone();
            let location = format!("{path}:{line}");
            inserts.push(tokio::spawn(async move {
                let reply = dispatcher
                    .enqueue(format!("break-insert {location}"), false)
                    .await?;
                let bkpt = reply
                    .fields
                    .get("bkpt")
                    .ok_or(espdap_mi::Error::MissingField("bkpt"))?;
                let number = bkpt.expect_u64("number")?;
                let actual_line = bkpt
                    .get_str("line")
                    .and_then(|l| l.parse().ok())
                    .unwrap_or(line);
                Ok::<_, Error>((number, actual_line))
            }));
        }

        let mut issued = Vec::with_capacity(lines.len());
        let mut results = Vec::with_capacity(lines.len());
        for insert in inserts {
            let outcome = insert
                .await
                .map_err(|err| Error::Communication(err.to_string()))?;
            match outcome {
                Ok((number, line)) => {
                    issued.push(number);
                    results.push(Breakpoint {
                        verified: true,
                        line: Some(line),
                        message: None,
                    });
                }
                Err(err) => results.push(Breakpoint {
                    verified: false,
                    line: None,
                    message: Some(err.to_string()),
                }),
            }
        }

        self.breakpoints
            .lock()
            .await
            .insert(path.to_string(), issued);
        Ok(results)
    }

    /// Breakpoint numbers currently recorded for a file.
    pub async fn breakpoints_for(&self, path: &str) -> Vec<u64> {
        self.breakpoints
            .lock()
            .await
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        self.wait_ready("threads").await;

        let reply = self.dispatcher.enqueue("thread-info", false).await?;
        let threads = reply
            .fields
            .get("threads")
            .and_then(MiValue::as_list)
            .ok_or(espdap_mi::Error::MissingField("threads"))?;

        let mut result = Vec::with_capacity(threads.len());
        for thread in threads {
            let id = thread.expect_u64("id")? as u32;
            let target = thread.get_str("target-id").unwrap_or_default();
            let target_num: String = target.chars().filter(char::is_ascii_digit).collect();
            result.push(Thread {
                id,
                name: format!("Thread #{id} {target_num}"),
            });
        }
        // GDB reports newest-first; the editor wants the main thread on top.
        result.reverse();
        Ok(result)
    }

    /// Backtrace for one thread: select it, then list frames ahead of
    /// anything else already queued.
    pub async fn stack_trace(&self, thread_id: u32) -> Result<Vec<StackFrame>> {
        self.dispatcher
            .enqueue(format!("thread-select {thread_id}"), false)
            .await?;
        let reply = self.dispatcher.enqueue("stack-list-frames", true).await?;

        let stack = reply
            .fields
            .get("stack")
            .and_then(MiValue::as_list)
            .ok_or(espdap_mi::Error::MissingField("stack"))?;

        let mut frames = Vec::with_capacity(stack.len());
        for element in stack {
            let frame = element
                .get("frame")
                .ok_or(espdap_mi::Error::MissingField("frame"))?;
            let level = frame.expect_u64("level")? as u32;
            let id = FrameId::new(thread_id, level)?.pack();
            let func = frame.get_str("func").unwrap_or("??");
            let addr = frame.get_str("addr").unwrap_or("0x0");

            let source = frame.get_str("file").map(|file| Source {
                name: Some(
                    file.rsplit(['/', '\\'])
                        .next()
                        .unwrap_or(file)
                        .to_string(),
                ),
                path: frame.get_str("fullname").map(str::to_string),
            });
            let line = frame
                .get_str("line")
                .and_then(|l| l.parse().ok())
                .unwrap_or(0);

            frames.push(StackFrame {
                id,
                name: format!("{func}@{addr}"),
                source,
                line,
                column: 0,
            });
        }
        Ok(frames)
    }

    /// A single Local scope whose reference is the frame id itself.
    pub fn scopes(&self, frame_reference: u32) -> Vec<Scope> {
        vec![Scope {
            name: "Local".to_string(),
            variables_reference: frame_reference,
            expensive: false,
        }]
    }

    /// Serve a variables request; the reference's magnitude decides
    /// between frame locals and variable-object children.
    pub async fn variables(&self, reference: u32) -> Result<Vec<Variable>> {
        if reference < VAR_REF_START {
            let frame = FrameId::unpack(reference)?;
            self.stack_variables(frame).await
        } else {
            self.variable_children(reference).await
        }
    }

    async fn stack_variables(&self, frame: FrameId) -> Result<Vec<Variable>> {
        let reply = self
            .dispatcher
            .enqueue(
                format!(
                    "stack-list-variables --thread {} --frame {} --simple-values",
                    frame.thread_id(),
                    frame.level()
                ),
                false,
            )
            .await?;
        let locals = reply
            .fields
            .get("variables")
            .and_then(MiValue::as_list)
            .ok_or(espdap_mi::Error::MissingField("variables"))?;

        // Values cached from a previous stop are stale; refresh them all
        // in one round trip before reading. Best-effort: a stale value
        // beats a failed read.
        self.refresh_variables().await;

        let mut result = Vec::with_capacity(locals.len());
        for local in locals {
            let expression = local.expect_str("name")?;
            let identity = local_identity(expression);

            let mut cache = self.variables.lock().await;
            if let Some((handle, object)) = cache.lookup(&identity) {
                result.push(object.to_variable(handle));
                continue;
            }
            drop(cache);

            let reply = self
                .dispatcher
                .enqueue(format!("var-create {identity} * {expression}"), false)
                .await?;
            let object = VariableObject::from_create(expression, &reply.fields)?;
            let mut cache = self.variables.lock().await;
            let handle = cache.insert(object.clone());
            result.push(object.to_variable(handle));
        }
        Ok(result)
    }

    async fn variable_children(&self, reference: u32) -> Result<Vec<Variable>> {
        let parent = {
            let cache = self.variables.lock().await;
            cache
                .get(reference)
                .cloned()
                .ok_or(Error::InvalidReference(reference))?
        };

        // Not expandable; don't bother GDB.
        if parent.num_child == 0 {
            return Ok(Vec::new());
        }

        let reply = self
            .dispatcher
            .enqueue(
                format!("var-list-children --simple-values {}", parent.name),
                false,
            )
            .await?;
        if reply.fields.get_str("numchild") == Some("0") {
            return Ok(Vec::new());
        }
        let children = reply
            .fields
            .get("children")
            .and_then(MiValue::as_list)
            .ok_or(espdap_mi::Error::MissingField("children"))?;

        let mut result = Vec::with_capacity(children.len());
        for element in children {
            let child = element
                .get("child")
                .ok_or(espdap_mi::Error::MissingField("child"))?;

            let mut cache = self.variables.lock().await;
            let identity = child.expect_str("name")?;
            if let Some((handle, object)) = cache.lookup(identity) {
                result.push(object.to_variable(handle));
            } else {
                let object = VariableObject::from_child(child)?;
                let handle = cache.insert(object.clone());
                result.push(object.to_variable(handle));
            }
        }
        Ok(result)
    }

    /// Bulk-refresh all live variable objects. Failure is logged, not
    /// fatal.
    async fn refresh_variables(&self) {
        match self
            .dispatcher
            .enqueue("var-update --all-values *", false)
            .await
        {
            Ok(reply) => {
                if let Some(changelist) = reply.fields.get("changelist") {
                    self.variables.lock().await.apply_changelist(changelist);
                }
            }
            Err(err) => warn!(error = %err, "variable refresh failed, values may be stale"),
        }
    }

    /// REPL evaluation: the expression goes to GDB verbatim as an MI
    /// command. Other evaluate contexts are not supported.
    pub async fn evaluate(&self, expression: &str, context: Option<&str>) -> Result<String> {
        match context {
            Some("repl") | None => {
                let reply = self.dispatcher.enqueue(expression, false).await?;
                Ok(reply.fields.to_string())
            }
            Some(other) => Err(Error::UnsupportedRequest(format!(
                "evaluate in context `{other}`"
            ))),
        }
    }

    /// Interrupt the target.
    ///
    /// The state gate would never let a command out while the target is
    /// running, and interrupting is only meaningful then; clear the state
    /// up front and let the `*stopped` notification confirm it.
    pub async fn pause(&self) -> Result<()> {
        self.dispatcher.exec_state().force_stopped();
        self.dispatcher.enqueue("exec-interrupt", true).await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.dispatcher.enqueue("exec-continue", false).await?;
        Ok(())
    }

    pub async fn step_in(&self) -> Result<()> {
        self.dispatcher.enqueue("exec-step", true).await?;
        Ok(())
    }

    pub async fn step_out(&self) -> Result<()> {
        self.dispatcher.enqueue("exec-finish", true).await?;
        Ok(())
    }

    pub async fn step_over(&self) -> Result<()> {
        self.dispatcher.enqueue("exec-next", false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use espdap_mi::process::spawn_record_reader;
    use espdap_mi::{DispatcherConfig, ExecStateTracker};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::mpsc;

    /// Bridge wired to a scripted GDB over in-memory streams.
    ///
    /// The responder reads `token-command` lines, records the command, and
    /// writes back `token^<reply>` where `<reply>` comes from the script.
    fn scripted_bridge<F>(
        config: LaunchConfig,
        script: F,
    ) -> (Arc<SessionBridge>, Arc<StdMutex<Vec<String>>>)
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let (gdb_side, dap_side) = tokio::io::duplex(16384);
        let (dap_read, dap_write) = tokio::io::split(dap_side);
        let exec = Arc::new(ExecStateTracker::new());
        let dispatcher = Arc::new(espdap_mi::CommandDispatcher::new(
            dap_write,
            exec,
            DispatcherConfig::default(),
        ));
        let (events_tx, _events_rx) = mpsc::channel(16);
        spawn_record_reader(dap_read, dispatcher.clone(), events_tx);

        let commands = Arc::new(StdMutex::new(Vec::new()));
        let log = commands.clone();
        let (mut gdb_read, mut gdb_write) = tokio::io::split(gdb_side);
        tokio::spawn(async move {
            let mut lines = BufReader::new(&mut gdb_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some((token, command)) = line.split_once('-') else {
                    continue;
                };
                log.lock().unwrap().push(command.to_string());
                let reply = script(command);
                let payload = format!("{token}^{reply}\n(gdb)\n");
                if gdb_write.write_all(payload.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        (
            Arc::new(SessionBridge::new(dispatcher, config)),
            commands,
        )
    }

    fn done_script(_command: &str) -> String {
        "done".to_string()
    }

    async fn with_timeout<T>(fut: impl std::future::Future<Output = T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("test timed out")
    }

    #[tokio::test]
    async fn startup_issues_configured_sequence_in_order() {
        let config = LaunchConfig::default();
        let expected = config.startup_commands();
        let (bridge, commands) = scripted_bridge(config, done_script);

        with_timeout(bridge.run_startup()).await.unwrap();

        assert_eq!(*commands.lock().unwrap(), expected);
        assert!(bridge.dispatcher().exec_state().is_startup_complete());
    }

    #[tokio::test]
    async fn second_startup_is_a_no_op() {
        let (bridge, commands) = scripted_bridge(LaunchConfig::default(), done_script);

        with_timeout(bridge.run_startup()).await.unwrap();
        let issued = commands.lock().unwrap().len();
        with_timeout(bridge.run_startup()).await.unwrap();

        assert_eq!(commands.lock().unwrap().len(), issued);
    }

    #[tokio::test]
    async fn set_breakpoints_replaces_the_previous_set() {
        let numbers = AtomicU64::new(1);
        let (bridge, commands) = scripted_bridge(LaunchConfig::default(), move |command| {
            if command.starts_with("break-insert") && command.contains(':') {
                let line = command.rsplit(':').next().unwrap();
                let number = numbers.fetch_add(1, Ordering::SeqCst);
                format!("done,bkpt={{number=\"{number}\",line=\"{line}\"}}")
            } else {
                "done".to_string()
            }
        });
        with_timeout(bridge.run_startup()).await.unwrap();
        commands.lock().unwrap().clear();

        let first = with_timeout(bridge.set_breakpoints("/src/main.c", &[10, 20]))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|b| b.verified));
        assert_eq!(bridge.breakpoints_for("/src/main.c").await, vec![1, 2]);

        commands.lock().unwrap().clear();
        let second = with_timeout(bridge.set_breakpoints("/src/main.c", &[30]))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);

        let issued = commands.lock().unwrap().clone();
        let last_delete = issued
            .iter()
            .rposition(|c| c.starts_with("break-delete"))
            .expect("old breakpoints were cleared");
        let first_insert = issued
            .iter()
            .position(|c| c.starts_with("break-insert"))
            .expect("new breakpoint was inserted");
        assert!(issued.contains(&"break-delete 1".to_string()));
        assert!(issued.contains(&"break-delete 2".to_string()));
        assert!(last_delete < first_insert, "clears must precede inserts");
        assert_eq!(bridge.breakpoints_for("/src/main.c").await, vec![3]);
    }

    #[tokio::test]
    async fn failed_insert_reports_unverified_breakpoint() {
        let (bridge, _commands) = scripted_bridge(LaunchConfig::default(), |command| {
            if command.starts_with("break-insert") && command.contains(':') {
                "error,msg=\"No source file named ghost.c.\"".to_string()
            } else {
                "done".to_string()
            }
        });
        with_timeout(bridge.run_startup()).await.unwrap();

        let result = with_timeout(bridge.set_breakpoints("/src/ghost.c", &[5]))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(!result[0].verified);
        assert!(result[0]
            .message
            .as_deref()
            .unwrap()
            .contains("No source file"));
        assert!(bridge.breakpoints_for("/src/ghost.c").await.is_empty());
    }

    #[tokio::test]
    async fn threads_reverses_gdb_order_and_extracts_target_digits() {
        let (bridge, _commands) = scripted_bridge(LaunchConfig::default(), |command| {
            if command == "thread-info" {
                "done,threads=[{id=\"2\",target-id=\"Thread 1073432216\"},\
                 {id=\"1\",target-id=\"Thread 1073411772\"}]"
                    .to_string()
            } else {
                "done".to_string()
            }
        });
        with_timeout(bridge.run_startup()).await.unwrap();

        let threads = with_timeout(bridge.threads()).await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, 1);
        assert_eq!(threads[0].name, "Thread #1 1073411772");
        assert_eq!(threads[1].id, 2);
        assert_eq!(threads[1].name, "Thread #2 1073432216");
    }

    #[tokio::test]
    async fn stack_trace_packs_frame_ids_and_formats_names() {
        let (bridge, commands) = scripted_bridge(LaunchConfig::default(), |command| {
            if command == "stack-list-frames" {
                "done,stack=[frame={level=\"0\",addr=\"0x400d1234\",func=\"app_main\",\
                 file=\"main.c\",fullname=\"/src/main.c\",line=\"42\"},\
                 frame={level=\"1\",addr=\"0x400d0042\",func=\"main_task\"}]"
                    .to_string()
            } else {
                "done".to_string()
            }
        });

        let frames = with_timeout(bridge.stack_trace(2)).await.unwrap();

        assert!(commands
            .lock()
            .unwrap()
            .contains(&"thread-select 2".to_string()));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id, 2 << 8);
        assert_eq!(frames[0].name, "app_main@0x400d1234");
        assert_eq!(frames[0].line, 42);
        assert_eq!(
            frames[0].source.as_ref().unwrap().path.as_deref(),
            Some("/src/main.c")
        );
        assert_eq!(frames[1].id, 2 << 8 | 1);
        assert!(frames[1].source.is_none());
    }

    #[tokio::test]
    async fn locals_create_one_variable_object_per_expression() {
        let (bridge, commands) = scripted_bridge(LaunchConfig::default(), |command| {
            if command.starts_with("stack-list-variables") {
                "done,variables=[{name=\"counter\",value=\"41\",type=\"int\"}]".to_string()
            } else if command.starts_with("var-create") {
                "done,name=\"Local_Var_(counter)\",numchild=\"0\",value=\"41\",type=\"int\""
                    .to_string()
            } else if command.starts_with("var-update") {
                "done,changelist=[{name=\"Local_Var_(counter)\",value=\"42\",\
                 in_scope=\"true\"}]"
                    .to_string()
            } else {
                "done".to_string()
            }
        });

        let frame = FrameId::new(1, 0).unwrap().pack();
        let first = with_timeout(bridge.variables(frame)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "counter");
        assert_eq!(first[0].variables_reference, 0);

        let second = with_timeout(bridge.variables(frame)).await.unwrap();
        // The refresh lands before the read, so the cached object already
        // carries the updated value.
        assert_eq!(second[0].value, "42");

        let creates = commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("var-create"))
            .count();
        assert_eq!(creates, 1, "variable object must be created exactly once");
    }

    #[tokio::test]
    async fn expanding_a_variable_lists_children_lazily() {
        let (bridge, commands) = scripted_bridge(LaunchConfig::default(), |command| {
            if command.starts_with("stack-list-variables") {
                "done,variables=[{name=\"cfg\",value=\"{...}\",type=\"struct config\"}]"
                    .to_string()
            } else if command.starts_with("var-create") {
                "done,name=\"Local_Var_(cfg)\",numchild=\"2\",value=\"{...}\",\
                 type=\"struct config\""
                    .to_string()
            } else if command.starts_with("var-list-children") {
                "done,numchild=\"2\",children=[\
                 child={name=\"Local_Var_(cfg).mode\",exp=\"mode\",numchild=\"0\",\
                 value=\"3\",type=\"int\"},\
                 child={name=\"Local_Var_(cfg).baud\",exp=\"baud\",numchild=\"0\",\
                 value=\"115200\",type=\"int\"}]"
                    .to_string()
            } else if command.starts_with("var-update") {
                "done,changelist=[]".to_string()
            } else {
                "done".to_string()
            }
        });

        let frame = FrameId::new(1, 0).unwrap().pack();
        let locals = with_timeout(bridge.variables(frame)).await.unwrap();
        assert_eq!(locals.len(), 1);
        let parent_ref = locals[0].variables_reference;
        assert!(parent_ref >= VAR_REF_START);

        let children = with_timeout(bridge.variables(parent_ref)).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "mode");
        assert_eq!(children[0].variables_reference, 0);
        assert_eq!(children[1].value, "115200");

        // The children request is the only one that went to GDB after the
        // locals were materialized.
        let listings = commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("var-list-children"))
            .count();
        assert_eq!(listings, 1);
    }

    #[tokio::test]
    async fn unknown_variable_reference_is_rejected() {
        let (bridge, _commands) = scripted_bridge(LaunchConfig::default(), done_script);

        let err = with_timeout(bridge.variables(VAR_REF_START + 99)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidReference(r) if r == VAR_REF_START + 99));
    }

    #[tokio::test]
    async fn evaluate_forwards_repl_input_verbatim() {
        let (bridge, commands) = scripted_bridge(LaunchConfig::default(), |command| {
            if command.starts_with("data-evaluate-expression") {
                "done,value=\"42\"".to_string()
            } else {
                "done".to_string()
            }
        });

        let value = with_timeout(bridge.evaluate("data-evaluate-expression counter", Some("repl")))
            .await
            .unwrap();
        assert!(value.contains("42"));
        assert_eq!(
            commands.lock().unwrap().last().unwrap(),
            "data-evaluate-expression counter"
        );
    }

    #[tokio::test]
    async fn evaluate_rejects_other_contexts() {
        let (bridge, _commands) = scripted_bridge(LaunchConfig::default(), done_script);

        let err = with_timeout(bridge.evaluate("counter", Some("watch")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedRequest(_)));
    }

    #[tokio::test]
    async fn pause_clears_the_running_gate_before_interrupting() {
        let (bridge, commands) = scripted_bridge(LaunchConfig::default(), done_script);
        bridge
            .dispatcher()
            .exec_state()
            .observe(&espdap_mi::NotifyRecord {
                class: "running".to_string(),
                fields: MiValue::empty(),
            })
            .unwrap();

        with_timeout(bridge.pause()).await.unwrap();

        assert_eq!(
            commands.lock().unwrap().as_slice(),
            ["exec-interrupt".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gated_requests_proceed_after_the_ready_timeout() {
        let (bridge, _commands) = scripted_bridge(LaunchConfig::default(), |command| {
            if command == "thread-info" {
                "done,threads=[{id=\"1\",target-id=\"Thread 1\"}]".to_string()
            } else {
                "done".to_string()
            }
        });

        // Startup never runs; the readiness gate must time out rather
        // than hang the request forever. The paused clock makes the
        // ten-second wait instantaneous.
        let threads = bridge.threads().await.unwrap();
        assert_eq!(threads.len(), 1);
    }

    #[tokio::test]
    async fn scopes_expose_a_single_local_scope() {
        let (bridge, _commands) = scripted_bridge(LaunchConfig::default(), done_script);

        let reference = FrameId::new(1, 2).unwrap().pack();
        let scopes = bridge.scopes(reference);
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].name, "Local");
        assert_eq!(scopes[0].variables_reference, reference);
        assert!(!scopes[0].expensive);
    }
}
