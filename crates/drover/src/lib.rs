pub mod config;
pub mod error;
pub mod fetcher;
pub mod loghub;
pub mod manifest;
pub mod process;
pub mod registry;
pub mod server;
pub mod supervisor;

pub use crate::config::AgentConfig;
pub use crate::error::{CreateError, FetchError, ManifestError};
pub use crate::loghub::{LogChannel, LogHub, LogLine, LogSubscriber};
pub use crate::process::{CreateRequest, ProcessSnapshot, ProcessState};
pub use crate::registry::ProcessRegistry;
