//! Server error types and their HTTP mapping.

use std::net::SocketAddr;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::gateway::GatewayError;
use crate::sync::SyncError;

/// Realm sent with every 401 so git clients prompt for credentials.
pub const AUTH_REALM: &str = "Basic realm=\"mirrorgate\"";

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Gateway(err) => match err {
                GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
                GatewayError::Forbidden(_) | GatewayError::Denied(_) => StatusCode::FORBIDDEN,
                GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
                GatewayError::UpstreamUnavailable { .. } | GatewayError::Sync(_) => {
                    StatusCode::CONFLICT
                }
                GatewayError::Protocol(_) | GatewayError::InvalidBranch { .. } => {
                    StatusCode::BAD_REQUEST
                }
                GatewayError::Engine(_)
                | GatewayError::Lock(_)
                | GatewayError::Auth(_)
                | GatewayError::Git(_)
                | GatewayError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Bind { .. } | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SyncError> for ServerError {
    fn from(err: SyncError) -> Self {
        ServerError::Gateway(err.into())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request refused");
        }
        // git prints the body after "fatal:", so keep it to one line
        let mut response = (status, format!("{self}\n")).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(AUTH_REALM),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DenyReason, RepoId};

    #[test]
    fn statuses() {
        let cases = [
            (GatewayError::Unauthenticated, 401),
            (GatewayError::Forbidden("no".into()), 403),
            (GatewayError::Denied(DenyReason::NoBranchAssigned), 403),
            (GatewayError::NotFound("x".into()), 404),
            (
                GatewayError::InvalidBranch {
                    refname: "refs/heads/-evil".into(),
                    reason: "starts with '-'".into(),
                },
                400,
            ),
            (
                GatewayError::UpstreamUnavailable {
                    repo: RepoId::new("app").unwrap(),
                    source: SyncError::Unreachable {
                        repo: RepoId::new("app").unwrap(),
                        message: "down".into(),
                    },
                },
                409,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(ServerError::from(err).status().as_u16(), code);
        }
    }

    #[test]
    fn unauthorized_carries_realm() {
        let response = ServerError::from(GatewayError::Unauthenticated).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            AUTH_REALM
        );
    }
}
