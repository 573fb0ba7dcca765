//! Management API for the surrounding platform.
//!
//! Same authentication and permission rules as git access. Both actions go
//! through the gateway's locked sync/push paths.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::credentials::extract_secret;
use super::error::{ServerError, ServerResult};
use super::AppState;
use crate::core::types::{BranchName, Credential, Repository};
use crate::gateway::{Access, Gateway};

/// Result of a sync or push action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub repository_id: String,
    pub branch: Option<String>,
    pub success: bool,
    pub message: String,
}

/// `GET /api/repositories/{repo}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: String,
    pub name: String,
    pub project: String,
    pub origin: Option<String>,
    pub mirrored: bool,
    pub default_branch: String,
    pub branches: BTreeSet<String>,
    pub last_synced: Option<DateTime<Utc>>,
}

impl From<&Repository> for RepositoryInfo {
    fn from(repo: &Repository) -> Self {
        Self {
            id: repo.id.to_string(),
            name: repo.name.clone(),
            project: repo.project.clone(),
            origin: repo.origin.clone(),
            mirrored: repo.is_mirrored(),
            default_branch: repo.default_branch.to_string(),
            branches: repo.branches.iter().map(ToString::to_string).collect(),
            last_synced: repo.last_synced,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PushQuery {
    branch: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

async fn caller(
    gateway: &Gateway,
    headers: &HeaderMap,
    token: Option<&str>,
    repo: &str,
    access: Access,
) -> ServerResult<(Credential, Repository)> {
    let credential = gateway
        .authenticate(extract_secret(headers, token).as_deref())
        .await?;
    let repo = gateway.repository(repo)?;
    gateway.authorize(&credential, &repo, access).await?;
    Ok((credential, repo))
}

fn action(repo: &Repository, branch: Option<&BranchName>, result: Result<String, ServerError>) -> Response {
    let (status, success, message) = match result {
        Ok(message) => (StatusCode::OK, true, message),
        Err(e) => (StatusCode::CONFLICT, false, e.to_string()),
    };
    let body = ActionResponse {
        repository_id: repo.id.to_string(),
        branch: branch.map(ToString::to_string),
        success,
        message,
    };
    (status, Json(body)).into_response()
}

pub async fn repository_info(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> ServerResult<Json<RepositoryInfo>> {
    let (_, repo) = caller(&state.gateway, &headers, query.token.as_deref(), &repo, Access::Read).await?;
    Ok(Json(RepositoryInfo::from(&repo)))
}

/// `POST /api/repositories/{repo}/sync`
pub async fn sync_now(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let gateway = &state.gateway;
    let (_, repo) = caller(gateway, &headers, query.token.as_deref(), &repo, Access::Write).await?;
    let result = gateway
        .sync_now(&repo)
        .await
        .map(|changes| format!("synced from upstream; {} branch(es) changed", changes.len()))
        .map_err(ServerError::from);
    Ok(action(&repo, None, result))
}

/// `POST /api/repositories/{repo}/push?branch=B`
pub async fn push_branch(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<PushQuery>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let gateway = &state.gateway;
    let (credential, repo) =
        caller(gateway, &headers, query.token.as_deref(), &repo, Access::Write).await?;
    let branch = query
        .branch
        .as_deref()
        .ok_or_else(|| ServerError::BadRequest("missing 'branch' parameter".into()))
        .and_then(|b| BranchName::new(b).map_err(|e| ServerError::BadRequest(e.to_string())))?;
    gateway.authorize_branch(&credential, &branch)?;

    let result = gateway
        .push_to_remote(&repo, &branch)
        .await
        .map(|()| format!("pushed {branch} to upstream"))
        .map_err(ServerError::from);
    Ok(action(&repo, Some(&branch), result))
}
