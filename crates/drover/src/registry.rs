use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::CreateError;
use crate::loghub::{LogHub, LogSubscriber};
use crate::process::{CreateRequest, ProcessSnapshot, ProcessSpec, ProcessState, StatusCell};
use crate::supervisor::Supervisor;

struct ProcessEntry {
    spec: Arc<ProcessSpec>,
    status: Arc<StatusCell>,
    hub: LogHub,
    cancel: CancellationToken,
    /// Taken by `shutdown` so it can await the supervisor.
    task: Option<JoinHandle<()>>,
}

impl ProcessEntry {
    fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot::new(&self.spec, &self.status.current())
    }
}

/// Agent-wide slug -> process map.
///
/// The registry owns the map and nothing else: descriptor state belongs to
/// the supervisors, and handlers only ever see immutable snapshots. The
/// `(lookup, insert)` pair in [`create`](Self::create) is serialized under
/// the map lock.
#[derive(Clone)]
pub struct ProcessRegistry {
    processes: Arc<Mutex<HashMap<String, ProcessEntry>>>,
    config: Arc<AgentConfig>,
    client: reqwest::Client,
}

impl ProcessRegistry {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Validate, claim the slug, and launch the supervisor.
    ///
    /// The returned snapshot is the freshly inserted `pending` descriptor;
    /// by the time this returns, `list` and `get` from any caller see it.
    pub async fn create(&self, request: CreateRequest) -> Result<ProcessSnapshot, CreateError> {
        request.validate()?;
        let slug = request.slug();

        let mut processes = self.processes.lock().await;
        if processes.contains_key(&slug) {
            return Err(CreateError::SlugInUse(slug));
        }

        tracing::info!(
            slug = %slug,
            app = %request.app,
            node = %request.node,
            "process created"
        );

        let spec = Arc::new(request.into_spec());
        let status = Arc::new(StatusCell::new());
        let hub = LogHub::new(self.config.tail_capacity, self.config.subscriber_capacity);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor::new(
            spec.clone(),
            status.clone(),
            hub.clone(),
            self.config.clone(),
            self.client.clone(),
            cancel.clone(),
        );
        let registry = self.clone();
        let finished_slug = slug.clone();
        let task = tokio::spawn(async move {
            supervisor.run().await;
            registry.reap(&finished_slug).await;
        });

        let entry = ProcessEntry {
            spec,
            status,
            hub,
            cancel,
            task: Some(task),
        };
        let snapshot = entry.snapshot();
        processes.insert(slug, entry);
        Ok(snapshot)
    }

    /// Point-in-time snapshots of every live descriptor.
    pub async fn list(&self) -> Vec<ProcessSnapshot> {
        let processes = self.processes.lock().await;
        processes.values().map(ProcessEntry::snapshot).collect()
    }

    pub async fn get(&self, slug: &str) -> Option<ProcessSnapshot> {
        let processes = self.processes.lock().await;
        processes.get(slug).map(ProcessEntry::snapshot)
    }

    /// Signal the owning supervisor to terminate.
    ///
    /// Returns once the supervisor acknowledged the signal (the descriptor
    /// reads `terminating` or `deleted`), not necessarily after the child
    /// exited. Deleting a slug that is already on its way out is a no-op.
    pub async fn delete(&self, slug: &str) -> Option<()> {
        let (cancel, mut status) = {
            let processes = self.processes.lock().await;
            let entry = processes.get(slug)?;
            (entry.cancel.clone(), entry.status.watch())
        };

        tracing::info!(slug, "process delete requested");
        cancel.cancel();
        let _ = status
            .wait_for(|s| {
                matches!(s.state, ProcessState::Terminating | ProcessState::Deleted)
            })
            .await;
        Some(())
    }

    /// New log-hub subscription for the given slug.
    pub async fn subscribe(&self, slug: &str) -> Option<LogSubscriber> {
        let processes = self.processes.lock().await;
        let entry = processes.get(slug)?;
        tracing::info!(slug, "console attached");
        Some(entry.hub.subscribe())
    }

    /// Terminate every process and wait for the supervisors to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<(CancellationToken, Option<JoinHandle<()>>)> = {
            let mut processes = self.processes.lock().await;
            processes
                .values_mut()
                .map(|entry| (entry.cancel.clone(), entry.task.take()))
                .collect()
        };
        for (cancel, _) in &handles {
            cancel.cancel();
        }
        for (_, task) in handles {
            if let Some(task) = task {
                let _ = task.await;
            }
        }
        tracing::info!("all supervisors finished");
    }

    /// Drop the map entry once its supervisor reached `deleted`, freeing the
    /// slug for reuse.
    async fn reap(&self, slug: &str) {
        let mut processes = self.processes.lock().await;
        if let Some(entry) = processes.get(slug) {
            if entry.status.current().state == ProcessState::Deleted {
                processes.remove(slug);
            }
        }
    }
}
