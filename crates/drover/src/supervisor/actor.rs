use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use rand::Rng;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::fetcher;
use crate::loghub::{LogChannel, LogHub};
use crate::manifest;
use crate::process::{ProcessSpec, ProcessState, StatusCell};
use crate::supervisor::pump::spawn_pump;

enum LifecycleEnd {
    /// The delete signal fired; teardown for the current stage already ran.
    Cancelled,
    /// A stage failed; the descriptor should record the detail and await
    /// delete.
    Failed(String),
}

enum Outcome<T> {
    Cancelled,
    Done(T),
}

/// The task body owning one process descriptor.
pub struct Supervisor {
    spec: Arc<ProcessSpec>,
    status: Arc<StatusCell>,
    hub: LogHub,
    config: Arc<AgentConfig>,
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        spec: Arc<ProcessSpec>,
        status: Arc<StatusCell>,
        hub: LogHub,
        config: Arc<AgentConfig>,
        client: reqwest::Client,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spec,
            status,
            hub,
            config,
            client,
            cancel,
        }
    }

    /// Drive the descriptor to its terminal state.
    ///
    /// Returns only once the state is `deleted`, the hub is closed, and the
    /// scratch space is gone; the registry reaps the entry right after.
    pub async fn run(self) {
        tracing::info!(slug = %self.spec.slug, url = %self.spec.source_url, "supervisor started");
        match self.lifecycle().await {
            LifecycleEnd::Cancelled => {
                tracing::info!(slug = %self.spec.slug, "delete requested");
            }
            LifecycleEnd::Failed(detail) => {
                tracing::warn!(slug = %self.spec.slug, error = %detail, "process failed");
                self.status.fail(detail);
                self.cancel.cancelled().await;
                tracing::info!(slug = %self.spec.slug, "delete requested for failed process");
            }
        }
        self.status.set(ProcessState::Deleted);
        self.hub.close();
        self.cleanup_scratch().await;
        tracing::info!(slug = %self.spec.slug, "supervisor finished");
    }

    async fn lifecycle(&self) -> LifecycleEnd {
        let archive_path = self.config.archive_path(&self.spec.slug);
        let source_dir = self.config.source_dir(&self.spec.slug);

        if let Err(e) = self.prepare_scratch(&archive_path, &source_dir).await {
            return LifecycleEnd::Failed(format!("fetch-error (io): {e}"));
        }

        self.status.set(ProcessState::Fetching);
        let kind = match self
            .checked(fetcher::download(
                &self.client,
                &self.spec.source_url,
                &archive_path,
                self.config.fetch_ceiling,
            ))
            .await
        {
            Outcome::Cancelled => return LifecycleEnd::Cancelled,
            Outcome::Done(Ok(kind)) => kind,
            Outcome::Done(Err(e)) => {
                return LifecycleEnd::Failed(format!("fetch-error ({}): {e}", e.category()))
            }
        };

        self.status.set(ProcessState::Unpacking);
        let unpack = {
            let archive_path = archive_path.clone();
            let source_dir = source_dir.clone();
            tokio::task::spawn_blocking(move || fetcher::extract(kind, &archive_path, &source_dir))
        };
        match self.checked(unpack).await {
            Outcome::Cancelled => return LifecycleEnd::Cancelled,
            Outcome::Done(Ok(Ok(()))) => {}
            Outcome::Done(Ok(Err(e))) => {
                return LifecycleEnd::Failed(format!("fetch-error ({}): {e}", e.category()))
            }
            Outcome::Done(Err(join_err)) => {
                return LifecycleEnd::Failed(format!("fetch-error (io): unpack task: {join_err}"))
            }
        }

        self.status.set(ProcessState::Parsing);
        let entries = match manifest::parse(&source_dir) {
            Ok(entries) => entries,
            Err(e) => return LifecycleEnd::Failed(format!("parse-error: {e}")),
        };
        let Some(command) = entries.get(&self.spec.process_type) else {
            return LifecycleEnd::Failed(format!(
                "unknown-process-type: no {} entry for {:?}",
                manifest::MANIFEST_FILE,
                self.spec.process_type
            ));
        };
        let argv = match manifest::split_command(command) {
            Ok(argv) => argv,
            Err(e) => return LifecycleEnd::Failed(format!("parse-error: {e}")),
        };

        self.run_loop(&argv, &source_dir).await
    }

    /// Spawn, supervise, and respawn the child until delete.
    async fn run_loop(&self, argv: &[String], workdir: &Path) -> LifecycleEnd {
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                self.status.set(ProcessState::Terminating);
                return LifecycleEnd::Cancelled;
            }

            self.status.set(ProcessState::Running);
            let mut child = match self.spawn_child(argv, workdir) {
                Ok(child) => child,
                Err(e) => {
                    return LifecycleEnd::Failed(format!("spawn-error: {:?}: {e}", argv[0]))
                }
            };
            tracing::info!(slug = %self.spec.slug, pid = child.id(), "child started");

            let pumps: Vec<JoinHandle<()>> = [
                child
                    .stdout
                    .take()
                    .map(|out| spawn_pump(out, self.hub.clone(), LogChannel::Stdout)),
                child
                    .stderr
                    .take()
                    .map(|err| spawn_pump(err, self.hub.clone(), LogChannel::Stderr)),
            ]
            .into_iter()
            .flatten()
            .collect();

            let started = Instant::now();
            let deleted = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.terminate(&mut child).await;
                    true
                }
                exit = child.wait() => {
                    match exit {
                        Ok(status) => tracing::info!(
                            slug = %self.spec.slug,
                            code = status.code(),
                            "child exited"
                        ),
                        Err(e) => tracing::warn!(slug = %self.spec.slug, error = %e, "wait failed"),
                    }
                    false
                }
            };

            // Trailing output is delivered before the hub can be closed.
            for pump in pumps {
                let _ = pump.await;
            }
            if deleted {
                return LifecycleEnd::Cancelled;
            }

            self.status.set(ProcessState::Restarting);
            if started.elapsed() >= self.config.backoff_reset_window {
                attempt = 0;
            }
            let delay = backoff_delay(
                attempt,
                self.config.backoff_base,
                self.config.backoff_cap,
                rand::thread_rng().gen_range(0.5..1.5),
            );
            attempt = attempt.saturating_add(1);
            tracing::info!(
                slug = %self.spec.slug,
                delay_ms = delay.as_millis() as u64,
                "restarting child after backoff"
            );
            match self.checked(tokio::time::sleep(delay)).await {
                Outcome::Cancelled => {
                    self.status.set(ProcessState::Terminating);
                    return LifecycleEnd::Cancelled;
                }
                Outcome::Done(()) => {}
            }
        }
    }

    fn spawn_child(&self, argv: &[String], workdir: &Path) -> std::io::Result<Child> {
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(workdir)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command.spawn()
    }

    /// SIGTERM, wait out the grace period, then SIGKILL.
    async fn terminate(&self, child: &mut Child) {
        self.status.set(ProcessState::Terminating);
        if let Some(pid) = child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(slug = %self.spec.slug, error = %e, "SIGTERM failed");
            }
        }
        match tokio::time::timeout(self.config.termination_grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(slug = %self.spec.slug, code = status.code(), "child terminated");
            }
            Ok(Err(e)) => {
                tracing::warn!(slug = %self.spec.slug, error = %e, "wait failed during terminate");
            }
            Err(_) => {
                tracing::warn!(slug = %self.spec.slug, "grace expired, killing child");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }

    /// Race a stage against the delete signal.
    async fn checked<F>(&self, fut: F) -> Outcome<F::Output>
    where
        F: std::future::Future,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Outcome::Cancelled,
            out = fut => Outcome::Done(out),
        }
    }

    async fn prepare_scratch(&self, archive_path: &Path, source_dir: &Path) -> std::io::Result<()> {
        if let Some(parent) = archive_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let _ = tokio::fs::remove_file(archive_path).await;
        let _ = tokio::fs::remove_dir_all(source_dir).await;
        tokio::fs::create_dir_all(source_dir).await?;
        Ok(())
    }

    async fn cleanup_scratch(&self) {
        let _ = tokio::fs::remove_file(self.config.archive_path(&self.spec.slug)).await;
        let _ = tokio::fs::remove_dir_all(self.config.source_dir(&self.spec.slug)).await;
    }
}

/// `min(cap, base * 2^attempt)` scaled by the sampled jitter factor.
fn backoff_delay(attempt: u32, base: Duration, cap: Duration, jitter: f64) -> Duration {
    let exponential = base.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
    Duration::from_secs_f64(exponential.min(cap.as_secs_f64()) * jitter)
}
