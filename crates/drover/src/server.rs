//! HTTP/WebSocket adapter over the registry.
//!
//! The handlers decode JSON, call the registry, and encode JSON; all
//! lifecycle logic lives behind the registry boundary.

pub mod error;

mod attach;
mod middleware;
mod processes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::registry::ProcessRegistry;

pub struct ServerState {
    pub registry: ProcessRegistry,
}

pub fn router(registry: ProcessRegistry) -> Router {
    let state = Arc::new(ServerState { registry });
    Router::new()
        .route("/", get(processes::index))
        .route("/list-processes", get(processes::list_processes))
        .route("/create-process", post(processes::create_process))
        .route("/process-status/{slug}", get(processes::process_status))
        .route("/delete-process/{slug}", post(processes::delete_process))
        .route("/attach-console/{slug}", get(attach::attach_console))
        .layer(axum::middleware::from_fn(middleware::request_context))
        .with_state(state)
}
