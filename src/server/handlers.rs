//! Smart-HTTP handlers.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::credentials::extract_secret;
use super::error::{ServerError, ServerResult};
use super::AppState;
use crate::gateway::{Access, GatewayError, PushOutcome, PushRequest};
use crate::protocol::{advertisement, GitService};

#[derive(Debug, Deserialize)]
pub struct InfoRefsQuery {
    service: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

pub async fn health() -> &'static str {
    "ok"
}

fn git_response(content_type: &'static str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

fn require_content_type(headers: &HeaderMap, service: GitService) -> ServerResult<()> {
    let expected = service.request_content_type();
    match headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(ServerError::BadRequest(format!(
            "expected content type {expected}, got {}",
            actual.unwrap_or("none")
        ))),
    }
}

/// `GET /{repo}/info/refs?service=...`
pub async fn info_refs(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let service = GitService::from_param(query.service.as_deref().unwrap_or_default())
        .map_err(GatewayError::from)?;
    let gateway = &state.gateway;
    let credential = gateway
        .authenticate(extract_secret(&headers, query.token.as_deref()).as_deref())
        .await?;
    let repo = gateway.repository(&repo)?;
    gateway.authorize_service(&credential, &repo, service).await?;

    let refs = gateway.advertise(&repo, service).await?;
    Ok(git_response(
        service.advertisement_content_type(),
        advertisement(service, &refs),
    ))
}

/// `POST /{repo}/git-upload-pack`
pub async fn upload_pack(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Response> {
    require_content_type(&headers, GitService::UploadPack)?;
    let gateway = &state.gateway;
    let credential = gateway
        .authenticate(extract_secret(&headers, query.token.as_deref()).as_deref())
        .await?;
    let repo = gateway.repository(&repo)?;
    gateway.authorize(&credential, &repo, Access::Read).await?;

    let result = gateway.upload_pack(&repo, &body).await?;
    Ok(git_response(GitService::UploadPack.result_content_type(), result))
}

/// `POST /{repo}/git-receive-pack`
pub async fn receive_pack(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Response> {
    require_content_type(&headers, GitService::ReceivePack)?;
    let report = state
        .gateway
        .push(PushRequest {
            secret: extract_secret(&headers, query.token.as_deref()),
            repo,
            body: body.to_vec(),
        })
        .await?;
    if let PushOutcome::RolledBack { reason, .. } = &report.outcome {
        tracing::debug!(%reason, "returning receive-pack report for a rolled-back push");
    }
    Ok(git_response(
        GitService::ReceivePack.result_content_type(),
        report.response,
    ))
}
