use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::process::{CreateRequest, ProcessSnapshot, ProcessState};
use crate::server::error::ApiError;
use crate::server::ServerState;

/// Root document pointing at the two entry operations.
#[derive(Debug, Serialize)]
pub(crate) struct IndexDocument {
    list: String,
    create: String,
}

/// Wire form of a descriptor snapshot, with navigation URLs.
#[derive(Debug, Serialize)]
pub(crate) struct ProcessDocument {
    slug: String,
    app: String,
    node: String,
    process_type: String,
    state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    attach: String,
    details: String,
    delete: String,
}

fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
        .to_string()
}

fn document(host: &str, snapshot: ProcessSnapshot) -> ProcessDocument {
    ProcessDocument {
        attach: format!("ws://{host}/attach-console/{}", snapshot.slug),
        details: format!("http://{host}/process-status/{}", snapshot.slug),
        delete: format!("http://{host}/delete-process/{}", snapshot.slug),
        slug: snapshot.slug,
        app: snapshot.app,
        node: snapshot.node,
        process_type: snapshot.process_type,
        state: snapshot.state,
        last_error: snapshot.last_error,
    }
}

pub(crate) async fn index(headers: HeaderMap) -> Json<IndexDocument> {
    let host = request_host(&headers);
    Json(IndexDocument {
        list: format!("http://{host}/list-processes"),
        create: format!("http://{host}/create-process"),
    })
}

pub(crate) async fn list_processes(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let host = request_host(&headers);
    let processes: Vec<ProcessDocument> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|snapshot| document(&host, snapshot))
        .collect();
    Json(json!({ "processes": processes }))
}

pub(crate) async fn create_process(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let snapshot = state.registry.create(request).await?;
    let doc = document(&request_host(&headers), snapshot);
    let location = doc.details.clone();
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(doc),
    ))
}

pub(crate) async fn process_status(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<ProcessDocument>, ApiError> {
    let snapshot = state
        .registry
        .get(&slug)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no process {slug:?}")))?;
    Ok(Json(document(&request_host(&headers), snapshot)))
}

pub(crate) async fn delete_process(
    State(state): State<Arc<ServerState>>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .registry
        .delete(&slug)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no process {slug:?}")))?;
    Ok(Json(json!({})))
}
