//! Backend process lifecycle with crash recovery.

use crate::server::output::{self, OutputTail, ProcessExit, OUTPUT_TAIL_BYTES};
use crate::server::status::{base_url_for, build_status, socket_url_for};
use crate::server::{
    BackoffPolicy, BuildMode, ExecutableResolver, HealthChecker, HealthStatus, LaunchPlan,
    LockFile, PortAllocator, ServerCommand, ServerError, ServerPaths, ServerResult, ServerState,
    SupervisorConfig, SupervisorStatus,
};

use std::panic::Location;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use error_location::ErrorLocation;
use tokio::process::Command;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const REAP_WAIT: Duration = Duration::from_secs(2);
const IO_DRAIN_WAIT: Duration = Duration::from_millis(250);

/// Supervises the atlas-server process on behalf of the application.
///
/// Responsibilities:
/// - Allocate a port and resolve the right backend artifact to launch
/// - Detect readiness from the startup banner, with a probe fallback
/// - Monitor health and recover crashes within the restart budget
/// - Tear the process down gracefully, escalating to a forced kill
///
/// Exactly one instance is constructed by the composition root and
/// handed by reference to anything that needs status or control.
pub struct ServerSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    paths: ServerPaths,
    mode: BuildMode,
    handle: Mutex<Option<SpawnedServer>>,
    port: Mutex<Option<u16>>,
    health: Mutex<Option<Arc<HealthChecker>>>,
    lock_file: Mutex<Option<LockFile>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    recovery_task: Mutex<Option<JoinHandle<()>>>,
    command_tx: Mutex<Option<mpsc::Sender<ServerCommand>>>,
    restart_count: AtomicU32,
    shutting_down: Arc<AtomicBool>,
    restart_in_flight: AtomicBool,
    state_tx: watch::Sender<ServerState>,
    state_rx: watch::Receiver<ServerState>,
    // Serializes launch and teardown so only one attempt is ever in
    // flight; `shutting_down` is re-checked under this lock before
    // every spawn.
    op_lock: AsyncMutex<()>,
}

/// One launched backend generation, owned exclusively by the supervisor.
struct SpawnedServer {
    pid: u32,
    exit: watch::Receiver<Option<ProcessExit>>,
    ready: Option<oneshot::Receiver<()>>,
    stdout_tail: OutputTail,
    stderr_tail: OutputTail,
    io_tasks: Vec<JoinHandle<()>>,
}

impl ServerSupervisor {
    /// Create a new supervisor. No process is launched until `start`.
    pub fn new(paths: ServerPaths, mode: BuildMode, config: SupervisorConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ServerState::Stopped);

        Self {
            inner: Arc::new(Inner {
                config,
                paths,
                mode,
                handle: Mutex::new(None),
                port: Mutex::new(None),
                health: Mutex::new(None),
                lock_file: Mutex::new(None),
                monitor_task: Mutex::new(None),
                recovery_task: Mutex::new(None),
                command_tx: Mutex::new(None),
                restart_count: AtomicU32::new(0),
                shutting_down: Arc::new(AtomicBool::new(false)),
                restart_in_flight: AtomicBool::new(false),
                state_tx,
                state_rx,
                op_lock: AsyncMutex::new(()),
            }),
        }
    }

    /// Start the backend and wait for it to become ready.
    ///
    /// A no-op when the backend is already running. After the restart
    /// budget is exhausted only `restart` may resume the cycle.
    pub async fn start(&self) -> ServerResult<()> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;

        if lock(&inner.handle).is_some() {
            info!("Backend already running; start request ignored");
            return Ok(());
        }

        if let ServerState::Exhausted { restarts } = inner.state() {
            return Err(ServerError::RestartsExhausted {
                max: restarts,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        inner.shutting_down.store(false, Ordering::SeqCst);
        inner.set_state(ServerState::Starting);

        match inner.start_locked().await {
            Ok(port) => {
                info!("Backend started successfully on port {port}");
                Ok(())
            }
            Err(e) => {
                inner.abort_recovery();
                *lock(&inner.command_tx) = None;
                inner.teardown_generation();
                inner.release_runtime();
                inner.set_state(ServerState::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stop the backend gracefully, escalating to a forced kill after
    /// the grace period. Idempotent; safe to call from any state.
    pub async fn stop(&self) -> ServerResult<()> {
        let inner = &self.inner;

        // Flag first so in-flight health checks and pending restarts
        // short-circuit before they can spawn anything new.
        inner.shutting_down.store(true, Ordering::SeqCst);
        inner.abort_monitor();
        inner.abort_recovery();
        *lock(&inner.command_tx) = None;

        let _op = inner.op_lock.lock().await;

        let spawned = lock(&inner.handle).take();
        let Some(spawned) = spawned else {
            inner.release_runtime();
            inner.set_state(ServerState::Stopped);
            return Ok(());
        };

        inner.set_state(ServerState::ShuttingDown);
        if let Some(health) = lock(&inner.health).clone() {
            health.set_status(HealthStatus::ShuttingDown);
        }

        let pid = spawned.pid;
        let grace = Duration::from_secs(inner.config.resilience.shutdown_grace_secs);
        let mut exit_rx = spawned.exit.clone();

        graceful_terminate(pid);

        let exited = matches!(
            tokio::time::timeout(grace, exit_rx.wait_for(|e| e.is_some())).await,
            Ok(Ok(_))
        );

        if exited {
            info!("Backend exited gracefully");
        } else {
            info!("Grace period elapsed, force killing backend (PID: {pid})");
            force_kill(pid);
            let _ = tokio::time::timeout(REAP_WAIT, exit_rx.wait_for(|e| e.is_some())).await;
        }

        inner.release_runtime();
        inner.set_state(ServerState::Stopped);
        info!("Backend stopped");
        Ok(())
    }

    /// Stop, reset the restart budget, and start again.
    ///
    /// Concurrent restart requests are deduplicated; the extra caller
    /// returns immediately while the first request proceeds.
    pub async fn restart(&self) -> ServerResult<()> {
        if self.inner.restart_in_flight.swap(true, Ordering::SeqCst) {
            info!("Restart already in progress; request ignored");
            return Ok(());
        }

        let result = async {
            self.stop().await?;
            self.inner.restart_count.store(0, Ordering::SeqCst);
            self.start().await
        }
        .await;

        self.inner.restart_in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// Synchronous snapshot of the backend's state. No side effects.
    pub fn status(&self) -> SupervisorStatus {
        let inner = &self.inner;
        let state = inner.state();
        let port = *lock(&inner.port);
        let pid = lock(&inner.handle).as_ref().map(|s| s.pid);
        let health = lock(&inner.health).as_ref().map(|h| h.status());

        build_status(
            &state,
            &inner.config.server.host,
            port,
            pid,
            health.as_ref(),
            inner.restart_count.load(Ordering::SeqCst),
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.inner.state()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.inner.state_rx.clone()
    }

    /// Currently allocated port, if any.
    pub fn port(&self) -> Option<u16> {
        *lock(&self.inner.port)
    }

    /// Backend process PID, if running.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.inner.handle).as_ref().map(|s| s.pid)
    }

    /// HTTP base URL for the current generation.
    pub fn base_url(&self) -> Option<String> {
        self.port()
            .map(|p| base_url_for(&self.inner.config.server.host, p))
    }

    /// WebSocket URL for the current generation.
    pub fn socket_url(&self) -> Option<String> {
        self.port()
            .map(|p| socket_url_for(&self.inner.config.server.host, p))
    }
}

impl Inner {
    fn state(&self) -> ServerState {
        self.state_rx.borrow().clone()
    }

    fn set_state(&self, state: ServerState) {
        let _ = self.state_tx.send(state);
    }

    fn ensure_data_dir(&self) -> ServerResult<()> {
        std::fs::create_dir_all(&self.paths.data_dir).map_err(|e| ServerError::DataDirCreation {
            path: self.paths.data_dir.clone(),
            source: e,
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Fallible part of `start`, run under the op lock. The caller
    /// translates any error into the Failed state plus cleanup.
    async fn start_locked(self: &Arc<Self>) -> ServerResult<u16> {
        self.ensure_data_dir()?;

        let port = PortAllocator::allocate()?;
        info!("Using port {port}");

        let lock_file = LockFile::acquire(&self.paths.data_dir, port)?;
        *lock(&self.lock_file) = Some(lock_file);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        *lock(&self.command_tx) = Some(command_tx);
        self.spawn_recovery(command_rx);

        self.launch(port).await?;
        Ok(port)
    }

    /// Run the launch pipeline on an already-allocated port: resolve,
    /// spawn, wait for readiness, then hand off to the monitor.
    async fn launch(self: &Arc<Self>, port: u16) -> ServerResult<()> {
        let plan = ExecutableResolver::resolve(self.mode, &self.paths)?;
        let mut spawned = self.spawn_process(&plan, port)?;

        let ready_rx = spawned.ready.take();
        let io_tasks = std::mem::take(&mut spawned.io_tasks);
        let exit_rx = spawned.exit.clone();
        let stdout_tail = spawned.stdout_tail.clone();
        let stderr_tail = spawned.stderr_tail.clone();

        let health = Arc::new(HealthChecker::new(
            port,
            Duration::from_secs(self.config.resilience.probe_timeout_secs),
        ));

        // Stash the generation before waiting so a concurrent stop
        // can always find and kill it.
        *lock(&self.port) = Some(port);
        *lock(&self.health) = Some(health.clone());
        *lock(&self.handle) = Some(spawned);

        if let Err(e) = self
            .await_ready(
                ready_rx,
                io_tasks,
                exit_rx.clone(),
                &health,
                &stdout_tail,
                &stderr_tail,
            )
            .await
        {
            self.teardown_generation();
            return Err(e);
        }

        match health.probe().await {
            HealthStatus::Healthy { .. } => {
                info!("Health check confirmed backend is ready");
            }
            status => {
                warn!("Backend announced readiness but health check returned: {status:?}");
            }
        }

        self.set_state(ServerState::Running { port });
        self.spawn_monitor(exit_rx, health);

        Ok(())
    }

    /// Spawn the backend process with its environment injected and
    /// stdio captured. Returns as soon as the OS accepts the spawn;
    /// readiness is a separate signal.
    fn spawn_process(&self, plan: &LaunchPlan, port: u16) -> ServerResult<SpawnedServer> {
        self.ensure_data_dir()?;

        info!(
            "Spawning {} in {}",
            plan.program.display(),
            plan.cwd.display()
        );

        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .current_dir(&plan.cwd)
            .env("ATLAS_SERVER_PORT", port.to_string())
            .env("ATLAS_SERVER_HOST", &self.config.server.host)
            .env("ATLAS_DATA_DIR", &self.paths.data_dir)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ServerError::Spawn {
            source: e,
            location: ErrorLocation::from(Location::caller()),
        })?;

        let pid = child.id().ok_or_else(|| ServerError::Spawn {
            source: std::io::Error::other("process exited before a pid could be read"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ServerError::Spawn {
            source: std::io::Error::other("stdout was not captured"),
            location: ErrorLocation::from(Location::caller()),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ServerError::Spawn {
            source: std::io::Error::other("stderr was not captured"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let stdout_tail = OutputTail::with_capacity(OUTPUT_TAIL_BYTES);
        let stderr_tail = OutputTail::with_capacity(OUTPUT_TAIL_BYTES);
        let (ready_tx, ready_rx) = oneshot::channel();

        let io_tasks = vec![
            output::spawn_stdout_pump(
                stdout,
                stdout_tail.clone(),
                self.config.server.ready_marker.clone(),
                ready_tx,
            ),
            output::spawn_stderr_pump(stderr, stderr_tail.clone()),
        ];

        let (exit_tx, exit_rx) = watch::channel(None::<ProcessExit>);
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit {
                    code: status.code(),
                },
                Err(e) => {
                    warn!("Failed to await backend exit: {e}");
                    ProcessExit { code: None }
                }
            };
            let _ = exit_tx.send(Some(exit));
        });

        info!("Spawned atlas-server with PID: {pid}");

        Ok(SpawnedServer {
            pid,
            exit: exit_rx,
            ready: Some(ready_rx),
            stdout_tail,
            stderr_tail,
            io_tasks,
        })
    }

    /// Wait for the backend to become ready.
    ///
    /// Three signals race: the readiness marker in stdout, the startup
    /// timeout (which falls back to one active health probe before
    /// giving up), and process exit. An exit always wins, even over a
    /// marker that became visible in the same instant.
    async fn await_ready(
        &self,
        ready_rx: Option<oneshot::Receiver<()>>,
        io_tasks: Vec<JoinHandle<()>>,
        mut exit_rx: watch::Receiver<Option<ProcessExit>>,
        health: &HealthChecker,
        stdout_tail: &OutputTail,
        stderr_tail: &OutputTail,
    ) -> ServerResult<()> {
        let timeout_secs = self.config.resilience.startup_timeout_secs;

        let marker = async move {
            match ready_rx {
                Some(rx) => {
                    if rx.await.is_err() {
                        // Stream closed without the marker; the exit
                        // arm is the authoritative signal from here.
                        std::future::pending::<()>().await
                    }
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(marker);

        tokio::select! {
            biased;

            exited = async { exit_rx.wait_for(|e| e.is_some()).await.ok().and_then(|guard| *guard) } => {
                let code = exited.and_then(|e| e.code);
                // Let the pumps drain whatever the process managed to
                // write before snapshotting the tails.
                let _ = tokio::time::timeout(IO_DRAIN_WAIT, async {
                    for task in io_tasks {
                        let _ = task.await;
                    }
                })
                .await;
                Err(ServerError::ProcessExited {
                    code,
                    output: output::combined_tail(stdout_tail, stderr_tail),
                    location: ErrorLocation::from(Location::caller()),
                })
            }

            _ = &mut marker => {
                info!("Backend announced readiness");
                Ok(())
            }

            _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                // The banner text drifts across backend versions; ask
                // the health endpoint directly before giving up.
                if health.probe().await.is_healthy() {
                    info!("Readiness probe succeeded after marker timeout");
                    Ok(())
                } else {
                    Err(ServerError::StartupTimeout {
                        timeout_secs,
                        output: output::combined_tail(stdout_tail, stderr_tail),
                        location: ErrorLocation::from(Location::caller()),
                    })
                }
            }
        }
    }

    /// Watch one generation for trouble and hand off to recovery.
    ///
    /// The task ends after reporting its first failure; each relaunch
    /// gets a fresh monitor, so a stale timer can never fire against
    /// a process that no longer exists.
    fn spawn_monitor(
        self: &Arc<Self>,
        mut exit_rx: watch::Receiver<Option<ProcessExit>>,
        health: Arc<HealthChecker>,
    ) {
        self.abort_monitor();

        let Some(command_tx) = lock(&self.command_tx).clone() else {
            return;
        };
        let interval = Duration::from_secs(self.config.resilience.health_interval_secs);
        let shutting_down = self.shutting_down.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    exited = async { exit_rx.wait_for(|e| e.is_some()).await.ok().and_then(|guard| *guard) } => {
                        if shutting_down.load(Ordering::SeqCst) {
                            break;
                        }
                        let code = exited.and_then(|e| e.code);
                        warn!("Backend exited unexpectedly (code: {code:?})");
                        health.set_status(HealthStatus::Crashed { exit_code: code });
                        let _ = command_tx.send(ServerCommand::Crashed { code }).await;
                        break;
                    }

                    _ = tokio::time::sleep(interval) => {
                        if shutting_down.load(Ordering::SeqCst) {
                            break;
                        }
                        match health.probe().await {
                            HealthStatus::Unhealthy { reason } => {
                                if shutting_down.load(Ordering::SeqCst) {
                                    break;
                                }
                                warn!("Backend unhealthy: {reason}");
                                let _ = command_tx
                                    .send(ServerCommand::Unhealthy { reason })
                                    .await;
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        *lock(&self.monitor_task) = Some(task);
    }

    /// Process failure reports from monitors and drive restarts.
    fn spawn_recovery(self: &Arc<Self>, mut command_rx: mpsc::Receiver<ServerCommand>) {
        self.abort_recovery();

        let inner = self.clone();
        let task = tokio::spawn(async move {
            while let Some(cmd) = command_rx.recv().await {
                if inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                match &cmd {
                    ServerCommand::Unhealthy { reason } => {
                        warn!("Recovery requested: unhealthy ({reason})");
                    }
                    ServerCommand::Crashed { code } => {
                        warn!("Recovery requested: crashed (code: {code:?})");
                    }
                }
                if !inner.recover().await {
                    break;
                }
            }
        });

        *lock(&self.recovery_task) = Some(task);
    }

    /// Attempt restarts until one succeeds or the budget is spent.
    /// Returns false when recovery is over for good.
    async fn recover(self: &Arc<Self>) -> bool {
        let max = self.config.resilience.max_restarts;
        let backoff = BackoffPolicy::from(&self.config.resilience);

        loop {
            let used = self.restart_count.load(Ordering::SeqCst);
            if used >= max {
                error!(
                    "{}",
                    ServerError::RestartsExhausted {
                        max,
                        location: ErrorLocation::from(Location::caller()),
                    }
                );
                self.teardown_generation();
                self.set_state(ServerState::Exhausted { restarts: used });
                return false;
            }

            let attempt = self.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("Restarting backend, attempt {attempt}/{max}");
            self.set_state(ServerState::Restarting { attempt });

            tokio::time::sleep(backoff.next(attempt - 1)).await;

            if self.shutting_down.load(Ordering::SeqCst) {
                return false;
            }

            match self.relaunch().await {
                Ok(true) => return true,
                Ok(false) => return false,
                Err(e) => {
                    warn!("Restart attempt {attempt} failed: {e}");
                    continue;
                }
            }
        }
    }

    /// Replace the previous generation with a fresh one. Returns
    /// Ok(false) when shutdown won the race and nothing was spawned.
    async fn relaunch(self: &Arc<Self>) -> ServerResult<bool> {
        let _op = self.op_lock.lock().await;

        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(false);
        }

        self.abort_monitor();

        let prev = lock(&self.handle).take();
        if let Some(prev) = prev {
            force_kill(prev.pid);
            let mut exit_rx = prev.exit.clone();
            let _ = tokio::time::timeout(REAP_WAIT, async {
                exit_rx.wait_for(|e| e.is_some()).await.map(|_| ())
            })
            .await;
        }

        // Reuse the previous port when it is still free so client URLs
        // stay stable across the restart, otherwise allocate fresh.
        let port = match lock(&self.port).take() {
            Some(p) if PortAllocator::is_free(p) => p,
            _ => PortAllocator::allocate()?,
        };
        info!("Using port {port}");

        self.launch(port).await?;

        info!("Backend restarted successfully on port {port}");
        Ok(true)
    }

    /// Kill and forget the current generation, clearing everything
    /// derived from it.
    fn teardown_generation(&self) {
        if let Some(spawned) = lock(&self.handle).take() {
            force_kill(spawned.pid);
        }
        *lock(&self.port) = None;
        *lock(&self.health) = None;
    }

    /// Clear per-run resources on the way to Stopped.
    fn release_runtime(&self) {
        *lock(&self.port) = None;
        if let Some(health) = lock(&self.health).take() {
            health.set_status(HealthStatus::Stopped);
        }
        if let Some(mut lock_file) = lock(&self.lock_file).take() {
            lock_file.release();
        }
    }

    fn abort_monitor(&self) {
        if let Some(task) = lock(&self.monitor_task).take() {
            task.abort();
        }
    }

    fn abort_recovery(&self) {
        if let Some(task) = lock(&self.recovery_task).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(unix)]
fn graceful_terminate(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    info!("Sending SIGTERM to pid {pid}");
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).ok();
}

#[cfg(windows)]
fn graceful_terminate(pid: u32) {
    use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};

    info!("Sending CTRL_BREAK to pid {pid}");
    unsafe {
        GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).ok();
}

#[cfg(windows)]
fn force_kill(pid: u32) {
    std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()
        .ok();
}
