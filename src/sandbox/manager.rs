//! Sandbox lifecycle manager.
//!
//! Guarantees that each session has at most one live, time-bounded
//! container and that expired containers are reclaimed, either lazily
//! when a session is next looked up or by the periodic sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::runtime::{
    ContainerRuntime, ContainerSpec, ExecOptions, ExecOutput, LogOptions, ResourceLimits,
    RuntimeInfo,
};
use super::store::{SandboxRecord, SandboxStore, SandboxSummary, SlotGuard};
use super::SandboxError;
use crate::config::SandboxConfig;

/// Trivial command run inside a fresh container until it succeeds.
const READINESS_PROBE: [&str; 2] = ["echo", "ready"];

/// Fixed profile applied to every sandbox this manager creates.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub image: String,
    pub name_prefix: String,
    pub network: String,
    pub ttl: Duration,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub stop_timeout: Duration,
    pub limits: ResourceLimits,
    pub ports: Vec<u16>,
    /// Extra environment (proxy settings) passed to every container
    pub env: HashMap<String, String>,
}

impl From<&SandboxConfig> for SandboxSettings {
    fn from(config: &SandboxConfig) -> Self {
        let mut env = HashMap::new();
        let proxies = [
            ("HTTP_PROXY", &config.http_proxy),
            ("HTTPS_PROXY", &config.https_proxy),
            ("NO_PROXY", &config.no_proxy),
        ];
        for (key, value) in proxies {
            if let Some(value) = value {
                env.insert(key.to_string(), value.clone());
            }
        }

        Self {
            image: config.image.clone(),
            name_prefix: config.name_prefix.clone(),
            network: config.network.clone(),
            ttl: config.ttl(),
            ready_timeout: config.ready_timeout(),
            ready_poll_interval: config.ready_poll_interval(),
            stop_timeout: config.stop_timeout(),
            limits: ResourceLimits {
                cpu_cores: config.cpu_cores,
                memory_mb: config.memory_mb,
                shm_size_mb: config.shm_size_mb,
                cap_add: config.cap_add.clone(),
            },
            ports: config.ports.clone(),
            env,
        }
    }
}

pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    store: SandboxStore,
    settings: SandboxSettings,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: SandboxSettings) -> Self {
        Self {
            runtime,
            store: SandboxStore::new(),
            settings,
        }
    }

    // ── Lifecycle operations ─────────────────────────────

    /// Creates, starts, and probes a new sandbox for `session_id`.
    ///
    /// Fails with `AlreadyExists` if a live sandbox is registered for the
    /// session. An expired one is torn down first. On any failure after
    /// the container was created, it is removed before the error is
    /// returned, and no record is stored.
    pub async fn create_sandbox(&self, session_id: &str) -> Result<SandboxSummary, SandboxError> {
        let mut guard = self.store.lock(session_id).await;
        let result = self.create_locked(session_id, &mut guard).await;
        self.store.release(session_id, guard).await;
        result
    }

    /// Stops and removes the session's sandbox.
    ///
    /// Idempotent: an absent session is a no-op. The record is removed
    /// even when the runtime fails, in which case `DestructionFailed` is
    /// returned.
    pub async fn destroy_sandbox(&self, session_id: &str) -> Result<(), SandboxError> {
        let Some(mut guard) = self.store.lock_existing(session_id).await else {
            warn!("Sandbox for session {session_id} not found, nothing to destroy");
            return Ok(());
        };
        let result = self.destroy_locked(session_id, &mut guard).await;
        self.store.release(session_id, guard).await;
        result
    }

    /// Returns the live record for `session_id`, destroying it first if
    /// it has expired.
    pub async fn get_sandbox(&self, session_id: &str) -> Option<SandboxRecord> {
        let mut guard = self.store.lock_existing(session_id).await?;
        let live = self.expire_locked(session_id, &mut guard, Utc::now()).await;
        self.store.release(session_id, guard).await;
        live
    }

    /// Lists all live sandboxes, sweeping expired ones on the way.
    ///
    /// Sessions with an operation in flight are skipped: a create has no
    /// live record yet and a destroy is about to drop its record.
    pub async fn list_sandboxes(&self) -> Vec<SandboxSummary> {
        let now = Utc::now();
        let mut live = Vec::new();
        for session_id in self.store.session_ids().await {
            let Some(mut guard) = self.store.try_lock_existing(&session_id).await else {
                continue;
            };
            if let Some(record) = self.expire_locked(&session_id, &mut guard, now).await {
                live.push(record.summary());
            }
            self.store.release(&session_id, guard).await;
        }
        live
    }

    /// Destroys every expired sandbox. Returns how many were reclaimed.
    ///
    /// Busy sessions are left for the next sweep.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut reclaimed = 0;
        for session_id in self.store.session_ids().await {
            let Some(mut guard) = self.store.try_lock_existing(&session_id).await else {
                debug!("Sandbox for session {session_id} is busy, skipping sweep");
                continue;
            };
            let expired = guard.as_ref().is_some_and(|r| r.is_expired_at(now));
            if expired {
                if let Err(e) = self.destroy_locked(&session_id, &mut guard).await {
                    error!("{e}");
                }
                reclaimed += 1;
            }
            // Also prunes slots left empty by abandoned operations
            self.store.release(&session_id, guard).await;
        }
        if reclaimed > 0 {
            info!("Expiry sweep reclaimed {reclaimed} sandbox(es)");
        }
        reclaimed
    }

    /// Runs `command` inside the session's live sandbox.
    pub async fn execute_in_sandbox(
        &self,
        session_id: &str,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput, SandboxError> {
        let record = self
            .get_sandbox(session_id)
            .await
            .ok_or_else(|| SandboxError::NotFound(session_id.to_string()))?;

        debug!("Exec in sandbox {session_id}: {command:?}");
        self.runtime
            .exec(&record.container_id, command, options)
            .await
            .map_err(|source| SandboxError::Runtime {
                session_id: session_id.to_string(),
                source,
            })
    }

    /// Returns the tail of the session's container logs.
    pub async fn sandbox_logs(
        &self,
        session_id: &str,
        tail: Option<usize>,
    ) -> Result<String, SandboxError> {
        let record = self
            .get_sandbox(session_id)
            .await
            .ok_or_else(|| SandboxError::NotFound(session_id.to_string()))?;

        let options = LogOptions {
            tail,
            timestamps: false,
        };
        self.runtime
            .logs(&record.container_id, &options)
            .await
            .map_err(|source| SandboxError::Runtime {
                session_id: session_id.to_string(),
                source,
            })
    }

    /// Destroys every tracked sandbox. Used on process exit.
    pub async fn shutdown(&self) -> usize {
        let mut destroyed = 0;
        for session_id in self.store.session_ids().await {
            match self.destroy_sandbox(&session_id).await {
                Ok(()) => destroyed += 1,
                Err(e) => error!("{e}"),
            }
        }
        destroyed
    }

    // ── Locked helpers (caller holds the session slot) ──

    async fn create_locked(
        &self,
        session_id: &str,
        guard: &mut SlotGuard,
    ) -> Result<SandboxSummary, SandboxError> {
        if let Some(existing) = guard.as_ref() {
            if !existing.is_expired_at(Utc::now()) {
                return Err(SandboxError::AlreadyExists(session_id.to_string()));
            }
            info!("Replacing expired sandbox for session {session_id}");
            if let Err(e) = self.destroy_locked(session_id, guard).await {
                error!("{e}");
            }
        }

        let record = self.provision(session_id).await?;
        let summary = record.summary();
        **guard = Some(record);

        info!("Created sandbox for session {session_id}");
        Ok(summary)
    }

    async fn destroy_locked(
        &self,
        session_id: &str,
        guard: &mut SlotGuard,
    ) -> Result<(), SandboxError> {
        // Bookkeeping first: the record is gone whatever the runtime says
        let Some(record) = guard.take() else {
            warn!("Sandbox for session {session_id} not found, nothing to destroy");
            return Ok(());
        };

        let stop = self
            .runtime
            .stop_container(&record.container_id, self.settings.stop_timeout)
            .await;
        let remove = self.runtime.remove_container(&record.container_id, true).await;

        match stop.and(remove) {
            Ok(()) => {
                info!("Destroyed sandbox for session {session_id}");
                Ok(())
            }
            Err(e) => {
                let err = SandboxError::DestructionFailed {
                    session_id: session_id.to_string(),
                    reason: e.to_string(),
                };
                error!("{err}");
                Err(err)
            }
        }
    }

    /// Returns the live record, or destroys it and returns `None` if it
    /// expired at `now`.
    async fn expire_locked(
        &self,
        session_id: &str,
        guard: &mut SlotGuard,
        now: DateTime<Utc>,
    ) -> Option<SandboxRecord> {
        let record = guard.as_ref()?;
        if !record.is_expired_at(now) {
            return Some(record.clone());
        }

        info!("Sandbox for session {session_id} expired");
        // Destruction failures are logged; the record is removed either way
        let _ = self.destroy_locked(session_id, guard).await;
        None
    }

    // ── Provisioning ─────────────────────────────────────

    fn container_spec(&self, session_id: &str) -> ContainerSpec {
        let mut env = self.settings.env.clone();
        env.insert("SESSION_ID".to_string(), session_id.to_string());
        env.insert("DISPLAY".to_string(), ":99".to_string());

        ContainerSpec {
            image: self.settings.image.clone(),
            name: format!("{}-{session_id}", self.settings.name_prefix),
            env,
            network: self.settings.network.clone(),
            limits: self.settings.limits.clone(),
            ports: self.settings.ports.clone(),
        }
    }

    async fn provision(&self, session_id: &str) -> Result<SandboxRecord, SandboxError> {
        let spec = self.container_spec(session_id);
        let creation_failed = |reason: String| SandboxError::CreationFailed {
            session_id: session_id.to_string(),
            reason,
        };

        let container_id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| creation_failed(e.to_string()))?;

        if let Err(e) = self.runtime.start_container(&container_id).await {
            self.discard(&container_id).await;
            return Err(creation_failed(e.to_string()));
        }

        if let Err(e) = self.wait_until_ready(session_id, &container_id).await {
            self.discard(&container_id).await;
            return Err(e);
        }

        let runtime_info = match self.runtime.inspect(&container_id).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to inspect container {container_id}: {e}");
                RuntimeInfo::unknown(&container_id, &spec.name)
            }
        };

        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(self.settings.ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(SandboxRecord {
            session_id: session_id.to_string(),
            container_id,
            created_at,
            expires_at,
            runtime_info,
        })
    }

    /// Polls the readiness probe until it succeeds or the ceiling elapses.
    async fn wait_until_ready(
        &self,
        session_id: &str,
        container_id: &str,
    ) -> Result<(), SandboxError> {
        let probe: Vec<String> = READINESS_PROBE.iter().map(|s| s.to_string()).collect();
        let options = ExecOptions::default();

        let poll = async {
            loop {
                match self.runtime.exec(container_id, &probe, &options).await {
                    Ok(output) if output.success() => return,
                    Ok(output) => {
                        debug!("Container {container_id} not ready (exit {})", output.exit_code)
                    }
                    Err(e) => debug!("Waiting for container {container_id} to be ready: {e}"),
                }
                tokio::time::sleep(self.settings.ready_poll_interval).await;
            }
        };

        tokio::time::timeout(self.settings.ready_timeout, poll)
            .await
            .map_err(|_| SandboxError::Timeout {
                session_id: session_id.to_string(),
                waited: self.settings.ready_timeout,
            })
    }

    /// Best-effort teardown of a container that never became a record.
    async fn discard(&self, container_id: &str) {
        if let Err(e) = self
            .runtime
            .stop_container(container_id, self.settings.stop_timeout)
            .await
        {
            debug!("Stopping partial container {container_id} failed: {e}");
        }
        if let Err(e) = self.runtime.remove_container(container_id, true).await {
            error!("Failed to remove partial container {container_id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_settings, MockRuntime};

    fn manager(runtime: Arc<MockRuntime>, ttl: Duration) -> SandboxManager {
        let mut settings = test_settings();
        settings.ttl = ttl;
        SandboxManager::new(runtime, settings)
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_create_returns_summary_and_registers_record() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);

        let summary = m.create_sandbox("s1").await.unwrap();
        assert_eq!(summary.session_id, "s1");
        assert_eq!(summary.status, "running");
        assert_eq!(summary.runtime_info.name, "test-sandbox-s1");
        assert!(summary.expires_at > summary.created_at);

        let record = m.get_sandbox("s1").await.unwrap();
        assert_eq!(record.container_id, summary.container_id);
        assert_eq!(runtime.live_containers(), 1);
    }

    #[tokio::test]
    async fn test_container_spec_carries_session_env_and_profile() {
        let runtime = Arc::new(MockRuntime::new());
        let mut settings = test_settings();
        settings
            .env
            .insert("HTTPS_PROXY".to_string(), "http://proxy:3128".to_string());
        let m = SandboxManager::new(runtime.clone(), settings);

        m.create_sandbox("s1").await.unwrap();
        let spec = runtime.last_spec().unwrap();
        assert_eq!(spec.name, "test-sandbox-s1");
        assert_eq!(spec.env["SESSION_ID"], "s1");
        assert_eq!(spec.env["DISPLAY"], ":99");
        assert_eq!(spec.env["HTTPS_PROXY"], "http://proxy:3128");
        assert_eq!(spec.ports, vec![8080, 5900, 6080]);
    }

    #[tokio::test]
    async fn test_create_then_destroy_then_get_is_none() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);

        m.create_sandbox("s1").await.unwrap();
        m.destroy_sandbox("s1").await.unwrap();

        assert!(m.get_sandbox("s1").await.is_none());
        assert_eq!(runtime.live_containers(), 0);
        assert_eq!(runtime.stop_calls(), 1);
        assert_eq!(runtime.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);

        m.create_sandbox("s1").await.unwrap();
        m.destroy_sandbox("s1").await.unwrap();
        m.destroy_sandbox("s1").await.unwrap();

        // Second call touched nothing
        assert_eq!(runtime.stop_calls(), 1);
        assert_eq!(runtime.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_destroy_unknown_session_is_noop() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);
        assert!(m.destroy_sandbox("ghost").await.is_ok());
        assert_eq!(runtime.stop_calls(), 0);
    }

    #[tokio::test]
    async fn test_destroy_failure_still_removes_record() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);
        m.create_sandbox("s1").await.unwrap();

        runtime.fail_stop(true);
        let err = m.destroy_sandbox("s1").await.unwrap_err();
        assert!(matches!(err, SandboxError::DestructionFailed { .. }));

        // Force removal was still attempted and bookkeeping is clean
        assert_eq!(runtime.remove_calls(), 1);
        assert!(m.get_sandbox("s1").await.is_none());
        assert!(m.destroy_sandbox("s1").await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_absent_on_next_get() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), Duration::ZERO);

        m.create_sandbox("s1").await.unwrap();
        assert!(m.get_sandbox("s1").await.is_none());
        // Lazy expiry destroyed the container
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired_reclaims_zero_ttl() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), Duration::ZERO);

        m.create_sandbox("s1").await.unwrap();
        m.create_sandbox("s2").await.unwrap();
        assert_eq!(m.cleanup_expired().await, 2);
        assert_eq!(runtime.live_containers(), 0);
        assert_eq!(m.cleanup_expired().await, 0);
        assert_eq!(m.store.slot_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_live_sandboxes() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);

        m.create_sandbox("s1").await.unwrap();
        assert_eq!(m.cleanup_expired().await, 0);
        assert!(m.get_sandbox("s1").await.is_some());
    }

    #[tokio::test]
    async fn test_list_returns_live_and_sweeps_expired() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);
        m.create_sandbox("live").await.unwrap();

        let short = manager(runtime.clone(), Duration::ZERO);
        short.create_sandbox("old").await.unwrap();

        let listed = m.list_sandboxes().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, "live");

        assert!(short.list_sandboxes().await.is_empty());
        assert_eq!(runtime.live_containers(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_live_duplicate() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);

        let first = m.create_sandbox("s1").await.unwrap();
        let err = m.create_sandbox("s1").await.unwrap_err();
        assert!(matches!(err, SandboxError::AlreadyExists(ref id) if id == "s1"));

        // Original record untouched, no second container
        assert_eq!(m.get_sandbox("s1").await.unwrap().container_id, first.container_id);
        assert_eq!(runtime.created(), 1);
    }

    #[tokio::test]
    async fn test_create_replaces_expired_record() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), Duration::ZERO);

        let first = m.create_sandbox("s1").await.unwrap();
        let second = m.create_sandbox("s1").await.unwrap();
        assert_ne!(first.container_id, second.container_id);
        assert_eq!(runtime.live_containers(), 1);
    }

    #[tokio::test]
    async fn test_creation_failure_is_typed() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_create(true);
        let m = manager(runtime.clone(), HOUR);

        let err = m.create_sandbox("s1").await.unwrap_err();
        assert!(matches!(err, SandboxError::CreationFailed { .. }));
        assert!(m.get_sandbox("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_start_failure_removes_container() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_start(true);
        let m = manager(runtime.clone(), HOUR);

        let err = m.create_sandbox("s1").await.unwrap_err();
        assert!(matches!(err, SandboxError::CreationFailed { .. }));
        assert_eq!(runtime.created(), 1);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_never_ready_times_out_without_orphans() {
        let runtime = Arc::new(MockRuntime::never_ready());
        let m = manager(runtime.clone(), HOUR);

        let err = m.create_sandbox("s1").await.unwrap_err();
        match err {
            SandboxError::Timeout { session_id, waited } => {
                assert_eq!(session_id, "s1");
                assert_eq!(waited, test_settings().ready_timeout);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }

        assert!(m.get_sandbox("s1").await.is_none());
        assert_eq!(runtime.live_containers(), 0);
        assert!(runtime.probe_calls() > 1);
    }

    #[tokio::test]
    async fn test_becomes_ready_after_a_few_probes() {
        let runtime = Arc::new(MockRuntime::ready_after(3));
        let m = manager(runtime.clone(), HOUR);

        m.create_sandbox("s1").await.unwrap();
        assert_eq!(runtime.probe_calls(), 3);
    }

    #[tokio::test]
    async fn test_inspect_failure_falls_back_to_unknown_info() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_inspect(true);
        let m = manager(runtime.clone(), HOUR);

        let summary = m.create_sandbox("s1").await.unwrap();
        assert_eq!(summary.status, "unknown");
        assert_eq!(summary.runtime_info.name, "test-sandbox-s1");
    }

    #[tokio::test]
    async fn test_execute_in_missing_sandbox() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime, HOUR);

        let err = m
            .execute_in_sandbox("nope", &["ls".to_string()], &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(ref id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_execute_in_expired_sandbox_is_not_found() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime, Duration::ZERO);
        m.create_sandbox("s1").await.unwrap();

        let err = m
            .execute_in_sandbox("s1", &["ls".to_string()], &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_forwards_to_runtime() {
        let runtime = Arc::new(MockRuntime::new().with_exec(|cmd| ExecOutput {
            exit_code: 0,
            stdout: cmd.join(" "),
            stderr: String::new(),
        }));
        let m = manager(runtime.clone(), HOUR);
        m.create_sandbox("s1").await.unwrap();

        let out = m
            .execute_in_sandbox(
                "s1",
                &["ls".to_string(), "-la".to_string()],
                &ExecOptions::in_dir("/workspace"),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "ls -la");

        let (_, opts) = runtime.last_exec().unwrap();
        assert_eq!(opts.working_dir.as_deref(), Some("/workspace"));
    }

    #[tokio::test]
    async fn test_logs_for_live_sandbox() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime, HOUR);
        m.create_sandbox("s1").await.unwrap();

        let logs = m.sandbox_logs("s1", Some(10)).await.unwrap();
        assert!(logs.contains("test-sandbox-s1"));
        assert!(matches!(
            m.sandbox_logs("s2", None).await,
            Err(SandboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_destroys_everything() {
        let runtime = Arc::new(MockRuntime::new());
        let m = manager(runtime.clone(), HOUR);
        m.create_sandbox("a").await.unwrap();
        m.create_sandbox("b").await.unwrap();

        assert_eq!(m.shutdown().await, 2);
        assert_eq!(runtime.live_containers(), 0);
        assert!(m.list_sandboxes().await.is_empty());
    }

    // ── Concurrency ──────────────────────────────────────

    #[tokio::test]
    async fn test_concurrent_destroys_are_safe() {
        let runtime = Arc::new(MockRuntime::new());
        let m = Arc::new(manager(runtime.clone(), HOUR));
        m.create_sandbox("s1").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                tokio::spawn(async move { m.destroy_sandbox("s1").await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert_eq!(runtime.stop_calls(), 1);
        assert_eq!(runtime.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_one_container() {
        let runtime = Arc::new(MockRuntime::new().with_create_delay(Duration::from_millis(20)));
        let m = Arc::new(manager(runtime.clone(), HOUR));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let m = m.clone();
                tokio::spawn(async move { m.create_sandbox("s1").await })
            })
            .collect();

        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SandboxError::AlreadyExists(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(runtime.created(), 1);
        assert_eq!(runtime.live_containers(), 1);
    }

    #[tokio::test]
    async fn test_slow_create_does_not_stall_list_or_sweep() {
        let runtime = Arc::new(MockRuntime::new().with_create_delay(Duration::from_millis(300)));
        let m = Arc::new(manager(runtime.clone(), HOUR));
        m.create_sandbox("s1").await.unwrap();

        let pending = {
            let m = m.clone();
            tokio::spawn(async move { m.create_sandbox("s2").await })
        };
        // Let the second create take its slot
        tokio::time::sleep(Duration::from_millis(30)).await;

        let listed = tokio::time::timeout(Duration::from_millis(100), m.list_sandboxes())
            .await
            .expect("listing waited on another session's create");
        let ids: Vec<_> = listed.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s1"]);

        let reclaimed = tokio::time::timeout(Duration::from_millis(100), m.cleanup_expired())
            .await
            .expect("sweep waited on another session's create");
        assert_eq!(reclaimed, 0);

        pending.await.unwrap().unwrap();
        assert_eq!(m.list_sandboxes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_create_racing_sweep_never_reports_destroyed_record() {
        let runtime = Arc::new(MockRuntime::new().with_create_delay(Duration::from_millis(10)));
        let m = Arc::new(manager(runtime.clone(), HOUR));

        for round in 0..5 {
            let creator = {
                let m = m.clone();
                tokio::spawn(async move { m.create_sandbox("s1").await })
            };
            let destroyer = {
                let m = m.clone();
                tokio::spawn(async move { m.destroy_sandbox("s1").await })
            };
            let sweeper = {
                let m = m.clone();
                tokio::spawn(async move { m.cleanup_expired().await })
            };
            let _ = creator.await.unwrap();
            destroyer.await.unwrap().unwrap();
            sweeper.await.unwrap();

            // Whatever the interleaving, the store and the runtime agree
            let live = m.get_sandbox("s1").await;
            let expected = usize::from(live.is_some());
            assert_eq!(runtime.live_containers(), expected, "round {round}");
            if let Some(record) = live {
                assert!(runtime.is_live(&record.container_id));
            }
            m.destroy_sandbox("s1").await.unwrap();
        }
    }
}
