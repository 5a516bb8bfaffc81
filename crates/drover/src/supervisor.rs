//! Per-process lifecycle ownership.
//!
//! Each created process gets exactly one supervisor task, which drives the
//! descriptor through fetch, unpack, parse, spawn, restart, and termination,
//! and owns the only write path to the descriptor's state. External control
//! is a single cancellation token: cancelling it is the delete request.

mod actor;
mod pump;

pub use actor::Supervisor;
