//! In-memory doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, LlmResponse, Message, ToolCall, ToolDefinition};
use crate::sandbox::manager::SandboxSettings;
use crate::sandbox::runtime::{ContainerSpec, LogOptions, ResourceLimits, RuntimeInfo};
use crate::sandbox::{ContainerRuntime, ExecOptions, ExecOutput, RuntimeError};
use crate::tools::{Capability, ToolContext, ToolError};

/// Settings with short readiness timings.
pub fn test_settings() -> SandboxSettings {
    SandboxSettings {
        image: "agent-sandbox:test".to_string(),
        name_prefix: "test-sandbox".to_string(),
        network: "test-network".to_string(),
        ttl: Duration::from_secs(3600),
        ready_timeout: Duration::from_millis(200),
        ready_poll_interval: Duration::from_millis(10),
        stop_timeout: Duration::from_secs(1),
        limits: ResourceLimits {
            cpu_cores: 1.0,
            memory_mb: 512,
            shm_size_mb: 64,
            cap_add: vec!["SYS_ADMIN".to_string()],
        },
        ports: vec![8080, 5900, 6080],
        env: HashMap::new(),
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

// ── Container runtime ────────────────────────────────

type ExecHandler = Box<dyn Fn(&[String]) -> ExecOutput + Send + Sync>;

#[derive(Default)]
struct MockState {
    next_id: usize,
    specs: HashMap<String, ContainerSpec>,
    live: HashSet<String>,
    last_spec: Option<ContainerSpec>,
    last_exec: Option<(Vec<String>, ExecOptions)>,
}

/// Container runtime that keeps containers in a map.
///
/// The readiness probe (`echo ready`) is counted separately from other
/// commands, which go to the handler installed with [`with_exec`].
///
/// [`with_exec`]: MockRuntime::with_exec
pub struct MockRuntime {
    state: Mutex<MockState>,
    exec_handler: ExecHandler,
    /// Probe number that first succeeds; `None` never succeeds
    ready_on_probe: Option<usize>,
    create_delay: Duration,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_inspect: AtomicBool,
    created: AtomicUsize,
    stop_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    exec_count: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::ready_after(1)
    }

    pub fn never_ready() -> Self {
        Self {
            ready_on_probe: None,
            ..Self::ready_after(1)
        }
    }

    pub fn ready_after(probes: usize) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            exec_handler: Box::new(|_| ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
            ready_on_probe: Some(probes),
            create_delay: Duration::ZERO,
            fail_create: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_inspect: AtomicBool::new(false),
            created: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            exec_count: AtomicUsize::new(0),
        }
    }

    pub fn with_exec(mut self, handler: impl Fn(&[String]) -> ExecOutput + Send + Sync + 'static) -> Self {
        self.exec_handler = Box::new(handler);
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inspect(&self, fail: bool) {
        self.fail_inspect.store(fail, Ordering::SeqCst);
    }

    pub fn live_containers(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.state.lock().unwrap().live.contains(id)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Commands other than readiness probes.
    pub fn exec_count(&self) -> usize {
        self.exec_count.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state.lock().unwrap().last_spec.clone()
    }

    pub fn last_exec(&self) -> Option<(Vec<String>, ExecOptions)> {
        self.state.lock().unwrap().last_exec.clone()
    }

    fn check_live(&self, id: &str) -> Result<(), RuntimeError> {
        if self.is_live(id) {
            Ok(())
        } else {
            Err(RuntimeError::Container(format!("No such container: {id}")))
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::Image(format!("pull access denied for {}", spec.image)));
        }
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        state.specs.insert(id.clone(), spec.clone());
        state.live.insert(id.clone());
        state.last_spec = Some(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.check_live(id)?;
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Container("port is already allocated".to_string()));
        }
        Ok(())
    }

    async fn stop_container(&self, _id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(RuntimeError::Connection("daemon unreachable".to_string()));
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), RuntimeError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.live.remove(id);
        state.specs.remove(id);
        Ok(())
    }

    async fn exec(
        &self,
        id: &str,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput, RuntimeError> {
        self.check_live(id)?;

        if command.iter().map(String::as_str).eq(["echo", "ready"]) {
            let probe = self.probe_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let ready = self.ready_on_probe.is_some_and(|n| probe >= n);
            return Ok(ExecOutput {
                exit_code: if ready { 0 } else { 1 },
                stdout: if ready { "ready\n".to_string() } else { String::new() },
                stderr: String::new(),
            });
        }

        self.exec_count.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().last_exec = Some((command.to_vec(), options.clone()));
        Ok((self.exec_handler)(command))
    }

    async fn logs(&self, id: &str, options: &LogOptions) -> Result<String, RuntimeError> {
        let state = self.state.lock().unwrap();
        let spec = state
            .specs
            .get(id)
            .ok_or_else(|| RuntimeError::Container(format!("No such container: {id}")))?;
        let lines = [
            format!("[{}] starting", spec.name),
            format!("[{}] Xvfb listening on :99", spec.name),
            format!("[{}] sandbox ready", spec.name),
        ];
        let skip = options.tail.map_or(0, |n| lines.len().saturating_sub(n));
        Ok(lines[skip..].join("\n"))
    }

    async fn inspect(&self, id: &str) -> Result<RuntimeInfo, RuntimeError> {
        if self.fail_inspect.load(Ordering::SeqCst) {
            return Err(RuntimeError::Connection("inspect refused".to_string()));
        }
        let state = self.state.lock().unwrap();
        let spec = state
            .specs
            .get(id)
            .ok_or_else(|| RuntimeError::Container(format!("No such container: {id}")))?;
        Ok(RuntimeInfo {
            id: id.to_string(),
            name: spec.name.clone(),
            status: "running".to_string(),
            ports: spec.ports.iter().map(|p| (*p, p + 40000)).collect(),
            image: Some(spec.image.clone()),
            created_at: Some(Utc::now()),
        })
    }
}

// ── Language model ───────────────────────────────────

/// Language model that replays a fixed script and records every request.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    fallback: Option<LlmResponse>,
    requests: Mutex<Vec<Vec<Message>>>,
    tool_names: Mutex<Vec<Vec<String>>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            tool_names: Mutex::new(Vec::new()),
        }
    }

    /// Response returned once the script runs out.
    pub fn with_fallback(mut self, response: LlmResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Conversation sent with each request, in order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// Tool names advertised with each request.
    pub fn tool_names(&self) -> Vec<Vec<String>> {
        self.tool_names.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.tool_names
            .lock()
            .unwrap()
            .push(tools.unwrap_or_default().iter().map(|t| t.name.clone()).collect());

        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Transport("script exhausted".to_string())),
        }
    }

    fn description(&self) -> String {
        "scripted @ memory".to_string()
    }
}

// ── Tools ────────────────────────────────────────────

/// Tool that returns its arguments, or always fails.
pub struct EchoTool {
    name: String,
    fail: bool,
}

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: true,
        }
    }
}

#[async_trait]
impl Capability for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes its arguments back"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, context: &ToolContext, arguments: Value) -> Result<Value, ToolError> {
        if self.fail {
            return Err(ToolError::execution(&self.name, "deliberate failure"));
        }
        Ok(json!({
            "arguments": arguments,
            "session_id": context.session_id,
        }))
    }
}
