//! Axum router
//!
//! ```text
//! POST /orgs/{org}/repos/{repo}/git/push    multipart or JSON push
//! POST /orgs/{org}/repos/{repo}/git/fetch   pack for optional wants
//! GET  /orgs/{org}/repos/{repo}/refs        ref listing
//! GET  /health                              liveness, never authenticated
//! ```

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use libgitrow_core::store::validate_repo_name;
use libgitrow_core::{PushUpdate, Ref};
use libgitrow_wire::messages::{METADATA_FIELD, PACK_FIELD};
use libgitrow_wire::{
    FetchRequest, FetchResponse, HeadInfo, PushJsonBody, PushMetadata, PushResponse, RefEntry,
    RefsResponse,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::ServerError;
use crate::fetch::FetchPackService;
use crate::push::PushPersistenceService;

/// Base64 inflates a pack by a third; leave room for the JSON around it
const BODY_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    backend: Arc<Backend>,
    push: Arc<PushPersistenceService>,
    fetch: Arc<FetchPackService>,
}

impl AppState {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self {
            push: Arc::new(PushPersistenceService::new(backend.clone())),
            fetch: Arc::new(FetchPackService::new(backend.clone())),
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_pack = state.backend.config().max_pack_bytes;
    let body_limit = max_pack.saturating_add(max_pack / 3).saturating_add(BODY_OVERHEAD);

    let repo_routes = Router::new()
        .route("/orgs/{org}/repos/{repo}/git/push", post(push))
        .route("/orgs/{org}/repos/{repo}/git/fetch", post(fetch))
        .route("/orgs/{org}/repos/{repo}/refs", get(list_refs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .merge(repo_routes)
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bearer-token check; open when no tokens are configured
async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let tokens = &state.backend.config().tokens;
    if tokens.is_empty() {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let verdict = match provided {
        Some(token) if tokens.iter().any(|t| t == token) => Ok(()),
        Some(_) => Err("invalid bearer token"),
        None => Err("missing bearer token"),
    };
    if let Err(reason) = verdict {
        warn!(path = %request.uri().path(), reason, "request rejected");
        return Err(ServerError::Unauthorized(reason.to_string()));
    }
    Ok(next.run(request).await)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}

async fn push(
    State(state): State<AppState>,
    Path((org, repo)): Path<(String, String)>,
    request: Request,
) -> Result<Json<PushResponse>, ServerError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (updates, pack) = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| rejection(e.status(), e.body_text()))?;
        read_multipart(multipart).await?
    } else if content_type.starts_with("application/json") {
        let Json(body) = Json::<PushJsonBody>::from_request(request, &state)
            .await
            .map_err(|e| rejection(e.status(), e.body_text()))?;
        let pack = body
            .pack_bytes()
            .map_err(|e| ServerError::Encoding(e.to_string()))?;
        (body.updates, pack)
    } else {
        return Err(ServerError::UnsupportedMediaType(content_type));
    };

    debug!(org = %org, repo = %repo, refs = updates.len(), pack_bytes = pack.len(), "push received");
    let service = state.push.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        service.persist_push(&org, &repo, &updates, &pack)
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(Json(outcome))
}

async fn read_multipart(mut multipart: Multipart) -> Result<(Vec<PushUpdate>, Vec<u8>), ServerError> {
    let mut metadata: Option<PushMetadata> = None;
    let mut pack = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| rejection(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| rejection(e.status(), e.body_text()))?;
        match name.as_str() {
            METADATA_FIELD => {
                let parsed = serde_json::from_slice(&bytes)
                    .map_err(|e| ServerError::BadRequest(format!("metadata field: {}", e)))?;
                metadata = Some(parsed);
            }
            PACK_FIELD => pack = bytes.to_vec(),
            other => debug!(field = other, "ignoring multipart field"),
        }
    }

    let metadata = metadata
        .ok_or_else(|| ServerError::BadRequest("multipart push without metadata field".to_string()))?;
    Ok((metadata.updates, pack))
}

async fn fetch(
    State(state): State<AppState>,
    Path((org, repo)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<FetchResponse>, ServerError> {
    let request: FetchRequest = if body.iter().all(u8::is_ascii_whitespace) {
        FetchRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::BadRequest(format!("fetch body: {}", e)))?
    };

    let service = state.fetch.clone();
    let (org_name, repo_name) = (org.clone(), repo.clone());
    let fetched = tokio::task::spawn_blocking(move || {
        service.fetch_pack(&org_name, &repo_name, request.wants.as_deref())
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;

    match fetched {
        Some(pack) => Ok(Json(pack.into_response())),
        None => Err(ServerError::NotFound(format!("no pack available for {}/{}", org, repo))),
    }
}

async fn list_refs(
    State(state): State<AppState>,
    Path((org, repo)): Path<(String, String)>,
) -> Result<Json<RefsResponse>, ServerError> {
    validate_repo_name(&org)?;
    validate_repo_name(&repo)?;
    let refs = state.backend.store().list_refs(&org, &repo)?;
    let head = pick_head(&refs, state.backend.config().default_branch.as_deref());
    Ok(Json(RefsResponse {
        refs: refs
            .into_iter()
            .map(|r| RefEntry {
                name: r.name,
                target_sha: r.target_oid,
                updated_at: r.updated_at,
            })
            .collect(),
        head,
    }))
}

/// HEAD follows the configured default branch, then `main`, then `master`
fn pick_head(refs: &[Ref], default_branch: Option<&str>) -> Option<HeadInfo> {
    let configured = default_branch.map(|b| {
        if b.starts_with("refs/") {
            b.to_string()
        } else {
            format!("refs/heads/{}", b)
        }
    });
    configured
        .into_iter()
        .chain(["refs/heads/main".to_string(), "refs/heads/master".to_string()])
        .find(|candidate| refs.iter().any(|r| &r.name == candidate))
        .map(|target| HeadInfo { target })
}

fn rejection(status: StatusCode, message: String) -> ServerError {
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => ServerError::PayloadTooLarge(message),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => ServerError::UnsupportedMediaType(message),
        _ => ServerError::BadRequest(message),
    }
}
