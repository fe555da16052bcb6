//! Subprocess implementation of the [`ToolExecutor`] port.
//!
//! Each tracked server owns one child process speaking line-delimited
//! JSON-RPC over stdin / stdout. Requests to a single server are serialized
//! through a fair async mutex around its stdout reader, and every request
//! carries a fresh numeric id so late answers to timed-out calls are
//! recognised and discarded. A watcher task owns the `Child` handle, logs the
//! exit and removes the entry from the process table.
use std::{
    io,
    process::Stdio,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use scc::HashMap;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{Mutex, oneshot, watch},
};

use crate::{
    core::{
        protocol::{RpcRequest, RpcResponse},
        tool::ServerRegistration,
    },
    metrics::GatewayMetrics,
    ports::executor::{ExecutorError, ExecutorResult, ProcessInfo, ToolExecutor},
};

/// How long to wait for a process to disappear after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(1);

struct ManagedProcess {
    server_id: String,
    instance: u64,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    requests: AtomicU64,
    stopping: AtomicBool,
    stdin: Mutex<Option<ChildStdin>>,
    /// Held for the whole request/response exchange.
    stdout: Mutex<BufReader<ChildStdout>>,
    kill_tx: StdMutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<bool>,
}

impl ManagedProcess {
    fn info(&self) -> ProcessInfo {
        ProcessInfo {
            server_id: self.server_id.clone(),
            pid: self.pid,
            started_at: self.started_at,
            requests: self.requests.load(Ordering::Relaxed),
        }
    }

    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    fn io_error(&self, source: io::Error) -> ExecutorError {
        ExecutorError::Io {
            server_id: self.server_id.clone(),
            source,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> ExecutorError {
        ExecutorError::MalformedResponse {
            server_id: self.server_id.clone(),
            reason: reason.into(),
        }
    }

    /// Write one request line and read until the matching envelope arrives.
    async fn exchange(&self, id: u64, line: String) -> ExecutorResult<RpcResponse> {
        let mut stdout = self.stdout.lock().await;

        {
            let mut stdin = self.stdin.lock().await;
            let pipe = stdin
                .as_mut()
                .ok_or_else(|| ExecutorError::ProcessExited(self.server_id.clone()))?;
            pipe.write_all(line.as_bytes())
                .await
                .map_err(|e| self.io_error(e))?;
            pipe.write_all(b"\n").await.map_err(|e| self.io_error(e))?;
            pipe.flush().await.map_err(|e| self.io_error(e))?;
        }

        let mut accumulated = String::new();
        loop {
            let mut buf = String::new();
            let read = stdout
                .read_line(&mut buf)
                .await
                .map_err(|e| self.io_error(e))?;

            if read == 0 {
                // One-shot workers print a (possibly multi-line) envelope and exit.
                let trimmed = accumulated.trim();
                if trimmed.is_empty() {
                    return Err(ExecutorError::ProcessExited(self.server_id.clone()));
                }
                let response: RpcResponse = serde_json::from_str(trimmed)
                    .map_err(|e| self.malformed(format!("{e} in output {trimmed:?}")))?;
                if !response.is_well_formed() {
                    return Err(self.malformed("envelope carries neither result nor error"));
                }
                return Ok(response);
            }

            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Ok(response) = serde_json::from_str::<RpcResponse>(trimmed) {
                if response.is_well_formed() {
                    if response.answers(id) {
                        return Ok(response);
                    }
                    tracing::debug!(
                        server = %self.server_id,
                        expected = id,
                        received = ?response.id,
                        "Discarding stale response"
                    );
                    accumulated.clear();
                    continue;
                }
            }

            accumulated.push_str(&buf);
            if let Ok(response) = serde_json::from_str::<RpcResponse>(accumulated.trim()) {
                if response.is_well_formed() && response.answers(id) {
                    return Ok(response);
                }
            }
        }
    }

    fn force_kill(&self) {
        let sender = self
            .kill_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Wait until the watcher has reaped the child. Returns `false` on timeout.
    async fn wait_exited(&self, limit: Duration) -> bool {
        let mut exited = self.exited.clone();
        matches!(
            tokio::time::timeout(limit, exited.wait_for(|done| *done)).await,
            Ok(Ok(_))
        )
    }

    /// Close stdin, signal SIGTERM, wait up to `grace`, then kill.
    async fn terminate(&self, grace: Duration) {
        self.stopping.store(true, Ordering::Relaxed);
        if self.has_exited() {
            return;
        }

        // Skip the stdin lock when a call is in flight; the signal still applies.
        if let Ok(mut stdin) = self.stdin.try_lock() {
            if let Some(mut pipe) = stdin.take() {
                let _ = pipe.shutdown().await;
            }
        }
        send_sigterm(self.pid);

        if self.wait_exited(grace).await {
            tracing::info!(server = %self.server_id, "Worker process stopped");
            return;
        }

        tracing::warn!(
            server = %self.server_id,
            grace_ms = grace.as_millis() as u64,
            "Worker did not exit within grace period, killing"
        );
        self.force_kill();
        if !self.wait_exited(KILL_WAIT).await {
            tracing::error!(server = %self.server_id, "Worker still running after kill");
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "Failed to deliver SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) {
    // Closing stdin is the only polite stop signal here.
}

/// Executor that runs each server as a child process.
pub struct ProcessExecutor {
    processes: Arc<HashMap<String, Arc<ManagedProcess>>>,
    spawn_lock: Mutex<()>,
    next_request_id: AtomicU64,
    next_instance: AtomicU64,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self {
            processes: Arc::new(HashMap::new()),
            spawn_lock: Mutex::new(()),
            next_request_id: AtomicU64::new(0),
            next_instance: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Report spawns and the active process count through `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn get(&self, server_id: &str) -> Option<Arc<ManagedProcess>> {
        self.processes
            .get_async(server_id)
            .await
            .map(|entry| entry.get().clone())
    }

    fn publish_active(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_active_processes(self.processes.len());
        }
    }

    fn spawn(&self, server: &ServerRegistration) -> ExecutorResult<Arc<ManagedProcess>> {
        let spawn_error = |source: io::Error| ExecutorError::Spawn {
            server_id: server.id.clone(),
            source,
        };

        if server.launch_command.trim().is_empty() {
            return Err(spawn_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty launch command",
            )));
        }

        let mut child: Child = Command::new(&server.launch_command)
            .args(&server.launch_args)
            .envs(&server.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stdout was not captured")))?;
        if let Some(stderr) = child.stderr.take() {
            let server_id = server.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(server = %server_id, "{}", line);
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        let process = Arc::new(ManagedProcess {
            server_id: server.id.clone(),
            instance: self.next_instance.fetch_add(1, Ordering::Relaxed),
            pid: child.id(),
            started_at: Utc::now(),
            requests: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            kill_tx: StdMutex::new(Some(kill_tx)),
            exited: exited_rx,
        });

        let watched = process.clone();
        let processes = self.processes.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(server = %watched.server_id, error = %e, "Kill failed");
                    }
                    child.wait().await
                }
            };

            match status {
                Ok(status) if watched.stopping.load(Ordering::Relaxed) => {
                    tracing::debug!(server = %watched.server_id, %status, "Worker process exited");
                }
                Ok(status) => {
                    tracing::warn!(server = %watched.server_id, %status, "Worker process exited unexpectedly");
                }
                Err(e) => {
                    tracing::error!(server = %watched.server_id, error = %e, "Failed to wait for worker process");
                }
            }

            let instance = watched.instance;
            let _ = processes
                .remove_if_async(&watched.server_id, |current| current.instance == instance)
                .await;
            let _ = exited_tx.send(true);
            if let Some(metrics) = metrics {
                metrics.set_active_processes(processes.len());
            }
        });

        tracing::info!(
            server = %server.id,
            command = %server.launch_command,
            pid = ?process.pid,
            "Spawned worker process"
        );
        Ok(process)
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ProcessExecutor {
    async fn start(&self, server: &ServerRegistration) -> ExecutorResult<ProcessInfo> {
        let _guard = self.spawn_lock.lock().await;

        if let Some(existing) = self.get(&server.id).await {
            if !existing.has_exited() {
                return Ok(existing.info());
            }
            let instance = existing.instance;
            let _ = self
                .processes
                .remove_if_async(&server.id, |current| current.instance == instance)
                .await;
        }

        let process = match self.spawn(server) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(server = %server.id, error = %e, "Failed to start worker");
                return Err(e);
            }
        };
        let info = process.info();
        let _ = self.processes.insert_async(server.id.clone(), process).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_process_spawn(&server.id);
        }
        self.publish_active();
        Ok(info)
    }

    async fn send(
        &self,
        server_id: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> ExecutorResult<RpcResponse> {
        let process = self
            .get(server_id)
            .await
            .ok_or_else(|| ExecutorError::NotRunning(server_id.to_string()))?;

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::Span::current().record("rpc.id", id);
        let request = RpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request).map_err(|e| ExecutorError::Io {
            server_id: server_id.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;
        process.requests.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(timeout, process.exchange(id, line)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    server = %server_id,
                    method = %method,
                    request_id = id,
                    "Worker request timed out"
                );
                Err(ExecutorError::Timeout {
                    server_id: server_id.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn is_tracked(&self, server_id: &str) -> bool {
        self.get(server_id)
            .await
            .is_some_and(|process| !process.has_exited())
    }

    async fn stop(&self, server_id: &str, grace: Duration) -> bool {
        let Some((_, process)) = self.processes.remove_async(server_id).await else {
            return false;
        };
        self.publish_active();
        process.terminate(grace).await;
        true
    }

    async fn shutdown(&self, timeout: Duration) {
        let mut drained = Vec::new();
        self.processes
            .retain_async(|_, process| {
                drained.push(process.clone());
                false
            })
            .await;
        self.publish_active();

        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "Stopping worker processes");

        for process in &drained {
            process.stopping.store(true, Ordering::Relaxed);
        }
        join_all(drained.iter().map(|process| process.terminate(timeout))).await;
        tracing::info!("All worker processes stopped");
    }

    async fn tracked(&self) -> Vec<ProcessInfo> {
        let mut tracked = Vec::new();
        self.processes
            .iter_async(|_, process| {
                if !process.has_exited() {
                    tracked.push(process.info());
                }
                true
            })
            .await;
        tracked.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        tracked
    }
}
