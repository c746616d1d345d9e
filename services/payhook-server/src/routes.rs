//! HTTP routes
//!
//! The webhook endpoint always answers 200 with the claim's fate in the
//! body; providers retry on anything else, and a fate is an answer, not
//! an error. Transaction endpoints are the host-side API for creating and
//! inspecting transactions.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use payhook_pipeline::{ManualTransitionRequest, WebhookProcessor};
use payhook_storage::{
    NewTransaction, ProcessingUpdate, Storage, StorageError, TransactionQuery,
};
use payhook_storage::{AuditAction, AuditEntry};
use payhook_types::{
    Currency, Money, TransactionId, TransactionStatus, TriggerType, VerificationMethod,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<WebhookProcessor>,
    pub storage: Arc<dyn Storage>,
}

/// Build the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/:provider", post(receive_webhook))
        .route("/transactions", post(create_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/audit", get(get_audit_trail))
        .route("/transactions/:id/processing", post(mark_processing))
        .route("/transactions/:id/status", post(manual_transition))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Intake for provider webhooks. Responds 200 regardless of fate so
/// providers stop retrying; the fate travels in the body.
async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<serde_json::Value> {
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    match state
        .processor
        .process(&provider, body.to_vec(), header_map)
        .await
    {
        Ok(result) => Json(json!({
            "claimFate": result.processing_status,
            "webhookLogId": result.webhook_log_id,
            "transactionId": result.transaction_id,
        })),
        Err(e) => {
            // Only reachable with throw_on_error, which the server does
            // not enable; still answer 200 so the provider stops retrying
            error!(provider = %provider, error = %e, "pipeline raised");
            Json(json!({
                "claimFate": payhook_types::ProcessingStatus::ParseError,
                "error": e.to_string(),
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTransactionBody {
    application_ref: String,
    provider: String,
    amount: u64,
    currency: String,
    #[serde(default)]
    provider_ref: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

async fn create_transaction(
    State(state): State<AppState>,
    Json(body): Json<CreateTransactionBody>,
) -> Response {
    let currency = match Currency::parse_lenient(&body.currency) {
        Ok(currency) => currency,
        Err(e) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": e.to_string() })))
                .into_response();
        }
    };

    let dto = NewTransaction {
        application_ref: body.application_ref,
        provider: body.provider.to_ascii_lowercase(),
        provider_ref: body.provider_ref,
        status: TransactionStatus::Pending,
        money: Money::new(body.amount, currency),
        verification_method: VerificationMethod::WebhookOnly,
        metadata: body.metadata.unwrap_or_else(|| json!({})),
        provider_created_at: None,
    };

    match state.storage.create_transaction(dto).await {
        Ok(tx) => (StatusCode::CREATED, Json(json!(tx))).into_response(),
        Err(e) => storage_error_response(e),
    }
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = TransactionId::parse(&id) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid id" }))).into_response();
    };
    match state
        .storage
        .find_transaction(&TransactionQuery::ById(id))
        .await
    {
        Ok(Some(tx)) => Json(json!(tx)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => storage_error_response(e),
    }
}

async fn get_audit_trail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = TransactionId::parse(&id) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid id" }))).into_response();
    };
    match state.storage.list_audit_logs(id).await {
        Ok(entries) => Json(json!(entries)).into_response(),
        Err(e) => storage_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct MarkProcessingBody {
    provider_ref: String,
}

async fn mark_processing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MarkProcessingBody>,
) -> Response {
    let Ok(id) = TransactionId::parse(&id) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid id" }))).into_response();
    };
    let audit = AuditEntry {
        transaction_id: id,
        action: AuditAction::StatusChanged,
        state_before: None,
        state_after: TransactionStatus::Processing,
        trigger: TriggerType::ApiVerification,
        webhook_log_id: None,
        verification_method: None,
        actor: "api".to_string(),
        reason: None,
        metadata: json!({}),
    };
    match state
        .storage
        .mark_as_processing(
            id,
            ProcessingUpdate {
                provider_ref: body.provider_ref,
                verification_method: None,
            },
            audit,
        )
        .await
    {
        Ok(tx) => Json(json!(tx)).into_response(),
        Err(e) => storage_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ManualTransitionBody {
    target: TransactionStatus,
    #[serde(default)]
    force: bool,
    actor: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn manual_transition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ManualTransitionBody>,
) -> Response {
    let Ok(id) = TransactionId::parse(&id) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid id" }))).into_response();
    };
    match state
        .processor
        .apply_manual_transition(ManualTransitionRequest {
            transaction_id: id,
            target: body.target,
            force: body.force,
            actor: body.actor,
            reason: body.reason,
        })
        .await
    {
        Ok(tx) => Json(json!(tx)).into_response(),
        Err(e) => storage_error_response(e),
    }
}

fn storage_error_response(e: StorageError) -> Response {
    let status = match &e {
        StorageError::DuplicateApplicationRef { .. } => StatusCode::CONFLICT,
        StorageError::TransactionNotFound { .. }
        | StorageError::WebhookLogNotFound { .. }
        | StorageError::OutboxEventNotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::TransitionRejected { .. } | StorageError::ProviderRefConflict { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "storage error");
    }
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
