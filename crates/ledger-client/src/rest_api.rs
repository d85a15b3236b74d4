use crate::client::{gather_metrics, InvokeRequest, InvokeResult, LedgerClient};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct QueryRequest {
    function: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    payload: String,
}

pub async fn invoke(
    State(client): State<Arc<LedgerClient>>,
    Json(req): Json<InvokeRequest>,
) -> Result<Json<InvokeResult>, String> {
    client.invoke(req).await.map(Json).map_err(|e| e.to_string())
}

pub async fn query(
    State(client): State<Arc<LedgerClient>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, String> {
    client
        .query(&req.function, req.args)
        .await
        .map(|payload| {
            Json(QueryResponse {
                payload: String::from_utf8_lossy(&payload).into_owned(),
            })
        })
        .map_err(|e| e.to_string())
}

pub async fn metrics() -> Result<String, String> {
    gather_metrics().map_err(|e| e.to_string())
}
