use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the agent engine.
///
/// Every timeout and capacity the supervisor, hub, and fetcher consult flows
/// through this struct so tests can shrink them to milliseconds.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Root of the agent's scratch space; archives land under
    /// `archives/<slug>` and extracted trees under `sources/<slug>`.
    pub scratch_dir: PathBuf,
    /// Number of recent lines each log hub retains for late subscribers.
    pub tail_capacity: usize,
    /// Outbound queue capacity per log subscriber.
    pub subscriber_capacity: usize,
    /// Ceiling on the whole archive download.
    pub fetch_ceiling: Duration,
    /// How long a child gets between SIGTERM and SIGKILL.
    pub termination_grace: Duration,
    /// First restart delay.
    pub backoff_base: Duration,
    /// Upper bound on the restart delay.
    pub backoff_cap: Duration,
    /// A child that stayed up at least this long resets the backoff counter.
    pub backoff_reset_window: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from(".drover"),
            tail_capacity: 256,
            subscriber_capacity: 1024,
            fetch_ceiling: Duration::from_secs(300),
            termination_grace: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            backoff_reset_window: Duration::from_secs(60),
        }
    }
}

impl AgentConfig {
    pub fn archive_path(&self, slug: &str) -> PathBuf {
        self.scratch_dir.join("archives").join(slug)
    }

    pub fn source_dir(&self, slug: &str) -> PathBuf {
        self.scratch_dir.join("sources").join(slug)
    }
}
