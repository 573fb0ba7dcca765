//! server
//!
//! Smart-HTTP git server and management API.
//!
//! # Routes
//!
//! | Method | Path                                   | Handler                        |
//! |--------|----------------------------------------|--------------------------------|
//! | GET    | `/healthz`                             | liveness                       |
//! | GET    | `/{repo}/info/refs?service=...`        | ref advertisement              |
//! | POST   | `/{repo}/git-upload-pack`              | fetch/clone                    |
//! | POST   | `/{repo}/git-receive-pack`             | push                           |
//! | GET    | `/api/repositories/{repo}`             | repository info                |
//! | POST   | `/api/repositories/{repo}/sync`        | sync now                       |
//! | POST   | `/api/repositories/{repo}/push?branch=` | push branch to remote         |
//!
//! `{repo}` is the repository id, with or without a `.git` suffix.
//!
//! Handlers only translate HTTP to [`Gateway`] calls; locking, sync and
//! rollback live in [`crate::gateway`].

pub mod credentials;
mod error;
mod handlers;
pub mod management;

pub use error::{ServerError, ServerResult, AUTH_REALM};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

use crate::gateway::Gateway;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// Build the router.
pub fn router(gateway: Arc<Gateway>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/:repo/info/refs", get(handlers::info_refs))
        .route("/:repo/git-upload-pack", post(handlers::upload_pack))
        .route("/:repo/git-receive-pack", post(handlers::receive_pack))
        .route("/api/repositories/:repo", get(management::repository_info))
        .route("/api/repositories/:repo/sync", post(management::sync_now))
        .route("/api/repositories/:repo/push", post(management::push_branch))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestDecompressionLayer::new())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(AppState { gateway })
}

/// The HTTP server.
pub struct Server {
    gateway: Arc<Gateway>,
    listen: SocketAddr,
    max_body_bytes: usize,
}

impl Server {
    pub fn new(gateway: Arc<Gateway>, listen: SocketAddr, max_body_bytes: usize) -> Self {
        Self {
            gateway,
            listen,
            max_body_bytes,
        }
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> ServerResult<()> {
        let listener = TcpListener::bind(self.listen)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.listen,
                source,
            })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener.
    ///
    /// After the listener stops, waits for outstanding PR follow-ups.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "mirrorgate listening");

        let app = router(Arc::clone(&self.gateway), self.max_body_bytes);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("listener stopped; waiting for follow-ups");
        self.gateway.wait_for_followups().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::core::types::{Association, Credential, UnitOfWork};
    use crate::gateway::tests::{local_repo, registry};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(temp: &TempDir) -> Router {
        let registry = registry(temp);
        local_repo(&registry, "app");
        let auth = StaticAuth::default()
            .with_credential("ops", Credential::operator("ops"), vec![])
            .with_credential("other-project", Credential::operator("x"), vec!["q".into()])
            .with_credential(
                "unassigned",
                Credential::agent("a", Association::UnitOfWork(UnitOfWork::new("T2", "p"))),
                vec![],
            );
        let gateway = Gateway::builder(registry).auth(Arc::new(auth)).build();
        router(gateway, 1024 * 1024)
    }

    fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut req = Request::get(uri);
        if let Some(token) = bearer {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        req.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn healthz() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp).oneshot(get("/healthz", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn anonymous_gets_401_with_realm() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(get("/app.git/info/refs?service=git-upload-pack", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            AUTH_REALM
        );
    }

    #[tokio::test]
    async fn wrong_project_gets_403() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(get("/app/info/refs?service=git-upload-pack", Some("other-project")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unassigned_agent_cannot_start_a_push() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(get("/app/info/refs?service=git-receive-pack", Some("unassigned")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("unit of work"));
    }

    #[tokio::test]
    async fn unknown_repository_and_service() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(get("/nope/info/refs?service=git-upload-pack", Some("ops")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app(&temp)
            .oneshot(get("/app/info/refs?service=git-upload-archive", Some("ops")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn advertisement_for_operator() {
        let temp = TempDir::new().unwrap();
        let response = app(&temp)
            .oneshot(get("/app/info/refs?service=git-receive-pack&token=ops", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-git-receive-pack-advertisement"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(b"001f# service=git-receive-pack\n0000"));
    }

    #[tokio::test]
    async fn pack_endpoints_check_content_type() {
        let temp = TempDir::new().unwrap();
        let req = Request::post("/app/git-receive-pack")
            .header(header::AUTHORIZATION, "Bearer ops")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("0000"))
            .unwrap();
        let response = app(&temp).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    mod management {
        use super::*;
        use crate::server::management::{ActionResponse, RepositoryInfo};

        #[tokio::test]
        async fn info_lists_repository() {
            let temp = TempDir::new().unwrap();
            let response = app(&temp)
                .oneshot(get("/api/repositories/app", Some("ops")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let info: RepositoryInfo = serde_json::from_slice(&body).unwrap();
            assert_eq!(info.id, "app");
            assert!(!info.mirrored);
        }

        #[tokio::test]
        async fn sync_of_local_repository_is_409() {
            let temp = TempDir::new().unwrap();
            let req = Request::post("/api/repositories/app/sync")
                .header(header::AUTHORIZATION, "Bearer ops")
                .body(Body::empty())
                .unwrap();
            let response = app(&temp).oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::CONFLICT);
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let action: ActionResponse = serde_json::from_slice(&body).unwrap();
            assert!(!action.success);
            assert_eq!(action.repository_id, "app");
        }

        #[tokio::test]
        async fn push_requires_branch() {
            let temp = TempDir::new().unwrap();
            let req = Request::post("/api/repositories/app/push")
                .header(header::AUTHORIZATION, "Bearer ops")
                .body(Body::empty())
                .unwrap();
            let response = app(&temp).oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }
}
