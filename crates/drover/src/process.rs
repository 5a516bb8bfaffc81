use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::CreateError;

/// Where a process is in its lifecycle.
///
/// `Deleted` is terminal; `Failed` is left only by a delete request. Every
/// transition is made by the owning supervisor, through [`StatusCell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Pending,
    Fetching,
    Unpacking,
    Parsing,
    Running,
    Restarting,
    Terminating,
    Failed,
    Deleted,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        self == ProcessState::Deleted
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Pending => "pending",
            ProcessState::Fetching => "fetching",
            ProcessState::Unpacking => "unpacking",
            ProcessState::Parsing => "parsing",
            ProcessState::Running => "running",
            ProcessState::Restarting => "restarting",
            ProcessState::Terminating => "terminating",
            ProcessState::Failed => "failed",
            ProcessState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Immutable identity of a process, fixed at create time.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub slug: String,
    pub app: String,
    pub node: String,
    pub process_type: String,
    pub source_url: String,
    pub env: BTreeMap<String, String>,
}

/// Wire document accepted by the create operation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    pub app: String,
    pub node: String,
    pub process_type: String,
    pub source_url: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn valid_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl CreateRequest {
    /// Validate field shapes; the registry calls this before touching the map.
    pub fn validate(&self) -> Result<(), CreateError> {
        if !valid_name(&self.app) {
            return Err(CreateError::Invalid(format!(
                "app must match [A-Za-z0-9_-]+, got {:?}",
                self.app
            )));
        }
        if !valid_name(&self.node) {
            return Err(CreateError::Invalid(format!(
                "node must match [A-Za-z0-9_-]+, got {:?}",
                self.node
            )));
        }
        if self.process_type.is_empty() {
            return Err(CreateError::Invalid(
                "process_type must not be empty".to_string(),
            ));
        }
        let url = reqwest::Url::parse(&self.source_url)
            .map_err(|e| CreateError::Invalid(format!("source_url is not a URL: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(CreateError::Invalid(format!(
                "source_url must be http or https, got {other}"
            ))),
        }
    }

    pub fn slug(&self) -> String {
        format!("{}.{}", self.app, self.node)
    }

    pub fn into_spec(self) -> ProcessSpec {
        let slug = self.slug();
        ProcessSpec {
            slug,
            app: self.app,
            node: self.node,
            process_type: self.process_type,
            source_url: self.source_url,
            env: self.env,
        }
    }
}

/// The supervisor-owned mutable half of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    pub state: ProcessState,
    pub last_error: Option<String>,
}

/// Single-writer state cell.
///
/// The owning supervisor holds the only write path; request handlers read
/// point-in-time copies and the registry's delete path waits on changes.
/// Transitions out of `Deleted` are ignored, which keeps the terminal state
/// terminal even if a late pump or timer races the teardown.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<ProcessStatus>,
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ProcessStatus {
            state: ProcessState::Pending,
            last_error: None,
        });
        Self { tx }
    }

    pub fn set(&self, state: ProcessState) {
        self.tx.send_modify(|status| {
            if status.state.is_terminal() {
                return;
            }
            status.state = state;
        });
    }

    pub fn fail(&self, detail: String) {
        self.tx.send_modify(|status| {
            if status.state.is_terminal() {
                return;
            }
            status.state = ProcessState::Failed;
            status.last_error = Some(detail);
        });
    }

    pub fn current(&self) -> ProcessStatus {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ProcessStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable copy of a descriptor handed to request handlers.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub slug: String,
    pub app: String,
    pub node: String,
    pub process_type: String,
    pub source_url: String,
    pub state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProcessSnapshot {
    pub fn new(spec: &ProcessSpec, status: &ProcessStatus) -> Self {
        Self {
            slug: spec.slug.clone(),
            app: spec.app.clone(),
            node: spec.node.clone(),
            process_type: spec.process_type.clone(),
            source_url: spec.source_url.clone(),
            state: status.state,
            last_error: status.last_error.clone(),
        }
    }
}
